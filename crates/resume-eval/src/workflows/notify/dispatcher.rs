use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// Robot webhook plus the optional signing secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
    pub secret: Option<String>,
}

impl WebhookTarget {
    /// Per-message reply hooks are pre-authorised and never signed.
    pub fn unsigned(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkdownMessage {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mentions {
    #[serde(rename = "atUserIds", skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
    #[serde(rename = "isAtAll")]
    pub at_all: bool,
}

impl Mentions {
    pub fn users(user_ids: Vec<String>) -> Self {
        Self {
            user_ids,
            at_all: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error("signing key rejected")]
    Signing,
    #[error("send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("dingtalk api error: code={code}, msg={message}")]
    Rejected { code: i64, message: String },
}

/// Outbound chat collaborator.
#[async_trait]
pub trait ChatDispatcher: Send + Sync {
    async fn send_markdown(
        &self,
        target: &WebhookTarget,
        message: &MarkdownMessage,
        mentions: &Mentions,
    ) -> Result<(), DispatchError>;

    async fn send_text(
        &self,
        target: &WebhookTarget,
        content: &str,
        mentions: &Mentions,
    ) -> Result<(), DispatchError>;
}

/// `base64(HMAC-SHA256(secret, "{timestamp_ms}\n{secret}"))`
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String, DispatchError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| DispatchError::Signing)?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Appends `timestamp` and `sign` when the target carries a secret; otherwise the url is used
/// as configured.
pub fn signed_url(target: &WebhookTarget, timestamp_ms: i64) -> Result<String, DispatchError> {
    let secret = match target.secret.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => secret,
        _ => return Ok(target.url.clone()),
    };

    let mut url = reqwest::Url::parse(&target.url)
        .map_err(|error| DispatchError::InvalidUrl(error.to_string()))?;
    let signature = sign(secret, timestamp_ms)?;
    url.query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &signature);
    Ok(url.into())
}

#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Posts robot messages over HTTPS.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    async fn post(&self, target: &WebhookTarget, payload: Value) -> Result<(), DispatchError> {
        let url = signed_url(target, Utc::now().timestamp_millis())?;
        debug!(
            signed = target.secret.is_some(),
            msgtype = payload["msgtype"].as_str().unwrap_or_default(),
            "posting robot message"
        );

        let response = self.http.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body: RobotResponse = response.json().await?;

        if body.errcode != 0 {
            warn!(
                status = status.as_u16(),
                errcode = body.errcode,
                errmsg = %body.errmsg,
                "robot message rejected"
            );
            return Err(DispatchError::Rejected {
                code: body.errcode,
                message: body.errmsg,
            });
        }
        info!(status = status.as_u16(), "robot message delivered");
        Ok(())
    }
}

#[async_trait]
impl ChatDispatcher for WebhookDispatcher {
    async fn send_markdown(
        &self,
        target: &WebhookTarget,
        message: &MarkdownMessage,
        mentions: &Mentions,
    ) -> Result<(), DispatchError> {
        let payload = json!({
            "msgtype": "markdown",
            "markdown": message,
            "at": mentions,
        });
        self.post(target, payload).await
    }

    async fn send_text(
        &self,
        target: &WebhookTarget,
        content: &str,
        mentions: &Mentions,
    ) -> Result<(), DispatchError> {
        let payload = json!({
            "msgtype": "text",
            "text": { "content": content },
            "at": mentions,
        });
        self.post(target, payload).await
    }
}
