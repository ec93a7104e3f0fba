use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::service::PushError;

/// One chat message addressed to the robot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub content: String,
    pub sender_id: String,
    /// Reply hook scoped to this message, when the platform provides one.
    #[serde(default)]
    pub session_webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Handled,
    /// The handler returned an error; one failure reply was attempted.
    Failed(String),
    /// The handler panicked; nothing was sent.
    Panicked(String),
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<(), PushError>;
    async fn reply_text(&self, message: &InboundMessage, text: &str) -> Result<(), PushError>;
}

/// Contains every failure of the inbound handler. Callers always get an outcome, never an
/// error or an unwinding panic, and a failed message is answered at most once.
#[derive(Clone)]
pub struct CallbackBoundary {
    handler: Arc<dyn InboundHandler>,
}

impl CallbackBoundary {
    pub fn new(handler: Arc<dyn InboundHandler>) -> Self {
        Self { handler }
    }

    pub async fn deliver(&self, message: InboundMessage) -> CallbackOutcome {
        let handled = AssertUnwindSafe(self.handler.handle(&message))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => CallbackOutcome::Handled,
            Ok(Err(err)) => {
                let detail = err.to_string();
                error!(sender = %message.sender_id, error = %detail, "reply handling failed");
                self.reply_failure(&message, &detail).await;
                CallbackOutcome::Failed(detail)
            }
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                error!(
                    sender = %message.sender_id,
                    content = %message.content,
                    panic = %detail,
                    "reply handler panicked"
                );
                CallbackOutcome::Panicked(detail)
            }
        }
    }

    async fn reply_failure(&self, message: &InboundMessage, detail: &str) {
        let text = format!("处理失败: {detail}");
        let replied = AssertUnwindSafe(self.handler.reply_text(message, &text))
            .catch_unwind()
            .await;
        match replied {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failure reply could not be sent"),
            Err(panic) => warn!(panic = %panic_detail(panic.as_ref()), "failure reply panicked"),
        }
    }

    /// Drains messages from a persistent chat connection until the sender side closes.
    ///
    /// The service binary answers callbacks over HTTP only; a stream-mode platform adapter owns
    /// the sending half and feeds decoded messages through here.
    pub fn spawn_listener(self, mut receiver: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("inbound chat listener started");
            while let Some(message) = receiver.recv().await {
                let outcome = self.deliver(message).await;
                if outcome != CallbackOutcome::Handled {
                    warn!(?outcome, "inbound message not handled");
                }
            }
            info!("inbound chat listener stopped");
        })
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
