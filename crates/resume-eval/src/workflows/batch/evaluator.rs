use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EvaluationClientConfig;

/// Upper bound for a single evaluation call, upload included.
pub const EVALUATION_DEADLINE: Duration = Duration::from_secs(300);

/// Inputs for one remote evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub name: String,
    pub job_description: String,
    /// Extra scoring guidance from the caller; omitted from the run when blank.
    pub criteria: String,
    pub filename: String,
    pub resume: Vec<u8>,
}

impl EvaluationRequest {
    fn parameters(&self, file_id: &str) -> Value {
        let mut parameters = json!({
            "name": self.name,
            "jd_text": self.job_description,
            "resume_file": { "file_id": file_id },
        });
        if !self.criteria.trim().is_empty() {
            parameters["criteria"] = Value::String(self.criteria.clone());
        }
        parameters
    }
}

/// Report text returned by the scoring workflow. `output` is preferred, `result` is the
/// older field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    pub output: Option<String>,
    pub result: Option<String>,
}

impl WorkflowReport {
    pub fn from_output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            result: None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.output
            .as_deref()
            .filter(|text| !text.is_empty())
            .or(self.result.as_deref())
    }
}

/// Remote AI collaborator that scores one resume against a job description.
#[async_trait]
pub trait EvaluationClient: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest)
        -> Result<WorkflowReport, EvaluationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("evaluation transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("evaluation http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("evaluation error code={code}: {message}")]
    Api { code: i64, message: String },
    #[error("evaluation response malformed: {0}")]
    Malformed(String),
    #[error("evaluation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn parse(body: &str) -> Result<Self, EvaluationError> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|error| EvaluationError::Malformed(error.to_string()))?;
        if envelope.code != 0 {
            let message = if envelope.msg.is_empty() {
                "request rejected".to_string()
            } else {
                envelope.msg.clone()
            };
            return Err(EvaluationError::Api {
                code: envelope.code,
                message,
            });
        }
        Ok(envelope)
    }
}

/// Pull the report out of a workflow-run response. `data` arrives either as an embedded JSON
/// string or as an object.
pub fn extract_report(body: &str) -> Result<WorkflowReport, EvaluationError> {
    let envelope = Envelope::parse(body)?;

    let data = match envelope.data {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)
            .map_err(|error| EvaluationError::Malformed(format!("data is not JSON: {error}")))?,
        other => other,
    };

    let field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    Ok(WorkflowReport {
        output: field("output"),
        result: field("result"),
    })
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

/// Client for the hosted workflow API: upload the resume, then run the workflow in blocking
/// mode.
#[derive(Debug, Clone)]
pub struct WorkflowEvaluationClient {
    http: reqwest::Client,
    config: EvaluationClientConfig,
}

impl WorkflowEvaluationClient {
    pub fn new(config: EvaluationClientConfig) -> Result<Self, EvaluationError> {
        let http = reqwest::Client::builder()
            .timeout(EVALUATION_DEADLINE)
            .build()?;
        Ok(Self { http, config })
    }

    async fn upload(&self, filename: &str, resume: &[u8]) -> Result<String, EvaluationError> {
        let url = format!("{}/v1/files/upload", self.config.base_url);
        let part = Part::bytes(resume.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.token)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            body = preview(&body),
            "resume upload finished"
        );

        if !status.is_success() {
            return Err(EvaluationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope = Envelope::parse(&body)?;
        envelope
            .data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| EvaluationError::Malformed("upload response missing file id".into()))
    }
}

#[async_trait]
impl EvaluationClient for WorkflowEvaluationClient {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<WorkflowReport, EvaluationError> {
        let file_id = self.upload(&request.filename, &request.resume).await?;

        let url = format!("{}/v1/workflow/run", self.config.base_url);
        let payload = json!({
            "workflow_id": self.config.workflow_id,
            "response_mode": "blocking",
            "parameters": request.parameters(&file_id),
        });

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), candidate = %request.name, "workflow run rejected");
            return Err(EvaluationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let report = extract_report(&body)?;
        info!(
            candidate = %request.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            has_report = report.text().is_some(),
            "workflow run completed"
        );
        Ok(report)
    }
}
