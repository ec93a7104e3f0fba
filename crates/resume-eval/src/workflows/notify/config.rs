use super::dispatcher::WebhookTarget;
use super::scheduler::PushSchedule;
use crate::workflows::candidates::{OwnerId, RepositoryError};

/// Robot settings for one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfig {
    pub owner: OwnerId,
    pub name: String,
    pub webhook: String,
    pub secret: Option<String>,
    pub schedule: PushSchedule,
    pub push_limit: usize,
    pub at_user_ids: Vec<String>,
    pub enabled: bool,
    pub auto_push_on_complete: bool,
}

impl NotifyConfig {
    /// Comma separated ids; whitespace is trimmed and blank entries dropped.
    pub fn parse_at_user_ids(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn webhook_target(&self) -> Option<WebhookTarget> {
        let url = self.webhook.trim();
        if url.is_empty() {
            return None;
        }
        Some(WebhookTarget {
            url: url.to_string(),
            secret: self.secret.clone(),
        })
    }

    pub fn accepts_auto_push(&self) -> bool {
        self.enabled && self.auto_push_on_complete && self.webhook_target().is_some()
    }
}

/// Source of robot settings. `active` is the one the daily schedule uses.
pub trait NotifyConfigStore: Send + Sync {
    fn active(&self) -> Result<Option<NotifyConfig>, RepositoryError>;
    fn for_owner(&self, owner: OwnerId) -> Result<Option<NotifyConfig>, RepositoryError>;
}
