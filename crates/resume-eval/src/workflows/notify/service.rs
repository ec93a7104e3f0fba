use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use tracing::{debug, error, info};

use super::config::{NotifyConfig, NotifyConfigStore};
use super::correlator::{ReplyCorrelator, ReplyError};
use super::dispatcher::{ChatDispatcher, DispatchError, Mentions, WebhookTarget};
use super::format;
use super::inbound::{InboundHandler, InboundMessage};
use super::session::{PushSession, PushSessionStore};
use crate::workflows::batch::service::CompletionNotifier;
use crate::workflows::candidates::{CandidateRecord, CandidateRepository, OwnerId, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("钉钉配置不存在或Webhook未配置")]
    NotConfigured,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

/// Which message a shared push renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    PendingList,
    EvaluationResult,
}

/// Sends candidate lists to the group robot and answers numeric replies.
pub struct PushService<R, D> {
    repository: Arc<R>,
    configs: Arc<dyn NotifyConfigStore>,
    dispatcher: Arc<D>,
    sessions: Arc<PushSessionStore>,
    correlator: ReplyCorrelator<R>,
}

impl<R, D> PushService<R, D>
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        configs: Arc<dyn NotifyConfigStore>,
        dispatcher: Arc<D>,
        sessions: Arc<PushSessionStore>,
    ) -> Self {
        Self {
            correlator: ReplyCorrelator::new(repository.clone(), sessions.clone()),
            repository,
            configs,
            dispatcher,
            sessions,
        }
    }

    pub fn sessions(&self) -> Arc<PushSessionStore> {
        self.sessions.clone()
    }

    pub fn current_session(&self) -> Option<PushSession> {
        self.sessions.current()
    }

    /// Format, send, record the notification on every candidate, then open a session. Nothing
    /// is recorded when the send fails.
    pub async fn push_candidates(
        &self,
        config: &NotifyConfig,
        mut candidates: Vec<CandidateRecord>,
        kind: PushKind,
    ) -> Result<Option<PushSession>, PushError> {
        if candidates.is_empty() {
            debug!(owner = %config.owner, "nothing to push");
            return Ok(None);
        }
        let target = config.webhook_target().ok_or(PushError::NotConfigured)?;

        let message = match kind {
            PushKind::PendingList => format::pending_list(&candidates, &config.at_user_ids),
            PushKind::EvaluationResult => {
                format::evaluation_result(&candidates, &config.at_user_ids)
            }
        };
        let mentions = Mentions::users(config.at_user_ids.clone());
        self.dispatcher
            .send_markdown(&target, &message, &mentions)
            .await?;

        let now = Utc::now();
        for candidate in candidates.iter_mut() {
            candidate.mark_notified(now);
            if let Err(err) = self.repository.update(candidate.clone()) {
                error!(
                    id = %candidate.id,
                    name = %candidate.name,
                    error = %err,
                    "failed to record notification"
                );
            }
        }

        let session = self
            .sessions
            .create(candidates.iter().map(|record| record.id).collect(), now);
        info!(
            owner = %config.owner,
            count = candidates.len(),
            ?kind,
            session_id = %session.id,
            "candidates pushed"
        );
        Ok(Some(session))
    }

    /// Daily run against the active configuration. Disabled or missing settings are a no-op.
    pub async fn push_scheduled(&self) -> Result<usize, PushError> {
        let config = match self.configs.active()? {
            Some(config) if config.enabled => config,
            _ => {
                info!("robot disabled; skipping daily push");
                return Ok(0);
            }
        };

        let candidates = self
            .repository
            .unnotified(config.owner, config.push_limit)?;
        if candidates.is_empty() {
            info!(owner = %config.owner, "no unnotified candidates to push");
            return Ok(0);
        }
        let count = candidates.len();
        self.push_candidates(&config, candidates, PushKind::PendingList)
            .await?;
        Ok(count)
    }

    pub async fn push_manual(&self, owner: OwnerId) -> Result<usize, PushError> {
        let config = self.configured_for(owner)?;
        info!(%owner, config = %config.name, "manual push triggered");

        let candidates = self.repository.unnotified(owner, config.push_limit)?;
        let count = candidates.len();
        self.push_candidates(&config, candidates, PushKind::PendingList)
            .await?;
        Ok(count)
    }

    /// Push after a batch. Returns whether anything was sent.
    pub async fn auto_push(
        &self,
        owner: OwnerId,
        candidates: Vec<CandidateRecord>,
    ) -> Result<bool, PushError> {
        if candidates.is_empty() {
            return Ok(false);
        }
        let config = match self.configs.for_owner(owner)? {
            Some(config) if config.accepts_auto_push() => config,
            Some(_) => {
                debug!(%owner, "auto push switched off; skipping");
                return Ok(false);
            }
            None => {
                debug!(%owner, "no robot configured; skipping auto push");
                return Ok(false);
            }
        };

        let pushed = self
            .push_candidates(&config, candidates, PushKind::EvaluationResult)
            .await?;
        Ok(pushed.is_some())
    }

    pub async fn send_test(&self, owner: OwnerId) -> Result<(), PushError> {
        let config = self.configured_for(owner)?;
        let target = config.webhook_target().ok_or(PushError::NotConfigured)?;
        let message = format::test_message(&config, Local::now());
        self.dispatcher
            .send_markdown(
                &target,
                &message,
                &Mentions::users(config.at_user_ids.clone()),
            )
            .await?;
        info!(%owner, signed = target.secret.is_some(), "test message sent");
        Ok(())
    }

    fn configured_for(&self, owner: OwnerId) -> Result<NotifyConfig, PushError> {
        self.configs
            .for_owner(owner)?
            .filter(|config| config.webhook_target().is_some())
            .ok_or(PushError::NotConfigured)
    }

    /// The per-message reply hook when the platform supplied one, else the active robot.
    fn reply_target(&self, message: &InboundMessage) -> Result<WebhookTarget, PushError> {
        if let Some(url) = message
            .session_webhook
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            return Ok(WebhookTarget::unsigned(url));
        }
        self.configs
            .active()?
            .and_then(|config| config.webhook_target())
            .ok_or(PushError::NotConfigured)
    }
}

#[async_trait]
impl<R, D> InboundHandler for PushService<R, D>
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    async fn handle(&self, message: &InboundMessage) -> Result<(), PushError> {
        info!(sender = %message.sender_id, content = %message.content, "reply received");
        let Some(resolution) = self.correlator.resolve(&message.content)? else {
            return Ok(());
        };

        let rendered = match resolution.candidates.as_slice() {
            [single] => format::candidate_detail(single),
            several => format::candidates_summary(several),
        };
        let target = self.reply_target(message)?;
        let mentions = Mentions::users(vec![message.sender_id.clone()]);
        self.dispatcher
            .send_markdown(&target, &rendered, &mentions)
            .await?;

        info!(
            sender = %message.sender_id,
            count = resolution.candidates.len(),
            session_id = %resolution.session_id,
            "candidate details sent"
        );
        Ok(())
    }

    async fn reply_text(&self, message: &InboundMessage, text: &str) -> Result<(), PushError> {
        let target = self.reply_target(message)?;
        self.dispatcher
            .send_text(&target, text, &Mentions::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<R, D> CompletionNotifier for PushService<R, D>
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    async fn batch_completed(
        &self,
        owner: OwnerId,
        candidates: Vec<CandidateRecord>,
    ) -> Result<(), PushError> {
        let count = candidates.len();
        if self.auto_push(owner, candidates).await? {
            info!(%owner, count, "auto push after batch sent");
        }
        Ok(())
    }
}
