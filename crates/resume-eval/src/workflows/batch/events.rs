use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use super::domain::{BatchReport, ItemResult, ResultType};
use super::duplicates::{DuplicateCheckResult, DuplicateSummary};

/// Pipeline stage announced through `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStage {
    Fetching,
    Checking,
    Evaluating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletePayload {
    pub success: bool,
    pub total: usize,
    pub results: Vec<ItemResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reevaluated_count: Option<usize>,
    pub skipped_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Named events streamed to the caller of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Status {
        stage: BatchStage,
        message: String,
    },
    Total {
        total: usize,
        skipped: usize,
    },
    DuplicatesFound {
        duplicates: Vec<DuplicateSummary>,
        total_fetched: usize,
        duplicate_count: usize,
        new_count: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        percent: usize,
        current: String,
        result_type: ResultType,
    },
    Complete(CompletePayload),
    Error {
        error: String,
    },
}

impl ProgressEvent {
    pub fn status(stage: BatchStage) -> Self {
        let message = match stage {
            BatchStage::Fetching => "正在从招聘系统获取简历...".to_string(),
            BatchStage::Checking => "正在检测已评估的候选人...".to_string(),
            BatchStage::Evaluating => "开始评估简历...".to_string(),
        };
        Self::Status { stage, message }
    }

    pub fn evaluating(total: usize) -> Self {
        Self::Status {
            stage: BatchStage::Evaluating,
            message: format!("开始评估 {total} 份简历..."),
        }
    }

    pub fn duplicates_found(check: &DuplicateCheckResult) -> Self {
        Self::DuplicatesFound {
            duplicates: check.duplicates.clone(),
            total_fetched: check.total_fetched,
            duplicate_count: check.duplicate_count,
            new_count: check.new_apply_ids.len(),
        }
    }

    pub fn progress(completed: usize, total: usize, current: String, result_type: ResultType) -> Self {
        let percent = if total == 0 { 0 } else { completed * 100 / total };
        Self::Progress {
            completed,
            total,
            percent,
            current,
            result_type,
        }
    }

    pub fn nothing_to_evaluate(skipped_count: usize) -> Self {
        Self::Complete(CompletePayload {
            success: true,
            total: 0,
            results: Vec::new(),
            new_count: None,
            reevaluated_count: None,
            skipped_count,
            message: Some("所有候选人均已评估，无需重复操作".to_string()),
        })
    }

    pub fn complete(report: &BatchReport) -> Self {
        Self::Complete(CompletePayload {
            success: true,
            total: report.total,
            results: report.results.clone(),
            new_count: Some(report.new_count),
            reevaluated_count: Some(report.reevaluated_count),
            skipped_count: report.skipped_count,
            message: None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::Total { .. } => "total",
            ProgressEvent::DuplicatesFound { .. } => "duplicates_found",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete(_) => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_frame(&self) -> String {
        let data = serde_json::to_string(self)
            .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}

/// Sending half of a batch stream. Delivery stops silently once the reader goes away; the
/// run itself carries on.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<ProgressEvent>,
    detached: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                detached: Arc::new(AtomicBool::new(false)),
            },
            receiver,
        )
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if self.detached.load(Ordering::Relaxed) {
            return;
        }
        if self.sender.send(event).await.is_err()
            && !self.detached.swap(true, Ordering::Relaxed)
        {
            debug!("batch stream reader disconnected; continuing without delivery");
        }
    }
}
