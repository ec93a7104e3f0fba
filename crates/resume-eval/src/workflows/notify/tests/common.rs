use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::workflows::candidates::{
    CandidateDraft, CandidateId, CandidateRecord, CandidateRepository, OwnerId, RepositoryError,
};
use crate::workflows::notify::config::{NotifyConfig, NotifyConfigStore};
use crate::workflows::notify::dispatcher::{
    ChatDispatcher, DispatchError, MarkdownMessage, Mentions, WebhookTarget,
};
use crate::workflows::notify::scheduler::PushSchedule;
use crate::workflows::notify::service::PushService;
use crate::workflows::notify::session::PushSessionStore;

pub(super) const OWNER: OwnerId = OwnerId(1);
pub(super) const WEBHOOK: &str = "https://robot.example.com/send?access_token=team";
pub(super) const REPLY_HOOK: &str = "https://robot.example.com/reply?session=abc";

pub(super) fn record(id: u64, name: &str, total_score: f64) -> CandidateRecord {
    let draft = CandidateDraft {
        owner: OWNER,
        apply_id: format!("AP-{id}"),
        name: name.to_string(),
        filename: format!("{name}.pdf"),
        total_score,
        grade: "B".to_string(),
        jd_match: 66,
        recommendation: "待定".to_string(),
        ..CandidateDraft::default()
    };
    CandidateRecord::from_draft(CandidateId(id), draft, Utc::now())
}

pub(super) fn notify_config() -> NotifyConfig {
    NotifyConfig {
        owner: OWNER,
        name: "招聘群".to_string(),
        webhook: WEBHOOK.to_string(),
        secret: Some("SECtest".to_string()),
        schedule: PushSchedule::new(9, 0).expect("valid"),
        push_limit: 10,
        at_user_ids: vec!["manager01".to_string()],
        enabled: true,
        auto_push_on_complete: true,
    }
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    records: Mutex<HashMap<CandidateId, CandidateRecord>>,
}

impl MemoryRepository {
    pub(super) fn with(records: Vec<CandidateRecord>) -> Self {
        let repository = Self::default();
        {
            let mut guard = repository.records.lock().expect("repository mutex poisoned");
            for record in records {
                guard.insert(record.id, record);
            }
        }
        repository
    }

    pub(super) fn get(&self, id: u64) -> CandidateRecord {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(&CandidateId(id))
            .cloned()
            .expect("record exists")
    }
}

impl CandidateRepository for MemoryRepository {
    fn insert(&self, draft: CandidateDraft) -> Result<CandidateRecord, RepositoryError> {
        Err(RepositoryError::Conflict(draft.apply_id))
    }

    fn update(&self, record: CandidateRecord) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .insert(record.id, record);
        Ok(())
    }

    fn fetch(&self, id: CandidateId) -> Result<Option<CandidateRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .get(&id)
            .cloned())
    }

    fn find_by_apply_id(
        &self,
        owner: OwnerId,
        apply_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .find(|record| record.owner == owner && record.apply_id == apply_id)
            .cloned())
    }

    fn find_by_apply_ids(
        &self,
        owner: OwnerId,
        apply_ids: &[String],
    ) -> Result<Vec<CandidateRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .filter(|record| record.owner == owner && apply_ids.contains(&record.apply_id))
            .cloned()
            .collect())
    }

    fn unnotified(
        &self,
        owner: OwnerId,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>, RepositoryError> {
        let mut records: Vec<CandidateRecord> = self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .filter(|record| record.owner == owner && record.is_unnotified())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        records.truncate(limit);
        Ok(records)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Sent {
    Markdown {
        target: WebhookTarget,
        message: MarkdownMessage,
        mentions: Mentions,
    },
    Text {
        target: WebhookTarget,
        content: String,
    },
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub(super) fn failing() -> Self {
        let dispatcher = Self::default();
        dispatcher.failing.store(true, Ordering::SeqCst);
        dispatcher
    }

    pub(super) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("dispatcher mutex poisoned").clone()
    }

    fn record(&self, sent: Sent) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected {
                code: 310000,
                message: "keywords not in content".to_string(),
            });
        }
        self.sent.lock().expect("dispatcher mutex poisoned").push(sent);
        Ok(())
    }
}

#[async_trait]
impl ChatDispatcher for RecordingDispatcher {
    async fn send_markdown(
        &self,
        target: &WebhookTarget,
        message: &MarkdownMessage,
        mentions: &Mentions,
    ) -> Result<(), DispatchError> {
        self.record(Sent::Markdown {
            target: target.clone(),
            message: message.clone(),
            mentions: mentions.clone(),
        })
    }

    async fn send_text(
        &self,
        target: &WebhookTarget,
        content: &str,
        _mentions: &Mentions,
    ) -> Result<(), DispatchError> {
        self.record(Sent::Text {
            target: target.clone(),
            content: content.to_string(),
        })
    }
}

pub(super) struct MemoryConfigStore {
    config: Option<NotifyConfig>,
}

impl MemoryConfigStore {
    pub(super) fn new(config: Option<NotifyConfig>) -> Self {
        Self { config }
    }
}

impl NotifyConfigStore for MemoryConfigStore {
    fn active(&self) -> Result<Option<NotifyConfig>, RepositoryError> {
        Ok(self.config.clone())
    }

    fn for_owner(&self, owner: OwnerId) -> Result<Option<NotifyConfig>, RepositoryError> {
        Ok(self.config.clone().filter(|config| config.owner == owner))
    }
}

pub(super) struct Fixture {
    pub(super) service: Arc<PushService<MemoryRepository, RecordingDispatcher>>,
    pub(super) repository: Arc<MemoryRepository>,
    pub(super) dispatcher: Arc<RecordingDispatcher>,
    pub(super) sessions: Arc<PushSessionStore>,
}

pub(super) fn fixture_with(
    records: Vec<CandidateRecord>,
    config: Option<NotifyConfig>,
    dispatcher: RecordingDispatcher,
) -> Fixture {
    let repository = Arc::new(MemoryRepository::with(records));
    let dispatcher = Arc::new(dispatcher);
    let sessions = Arc::new(PushSessionStore::new());
    let service = Arc::new(PushService::new(
        repository.clone(),
        Arc::new(MemoryConfigStore::new(config)),
        dispatcher.clone(),
        sessions.clone(),
    ));
    Fixture {
        service,
        repository,
        dispatcher,
        sessions,
    }
}

pub(super) fn fixture(records: Vec<CandidateRecord>) -> Fixture {
    fixture_with(records, Some(notify_config()), RecordingDispatcher::default())
}

pub(super) fn markdown_titles(sent: &[Sent]) -> Vec<String> {
    sent.iter()
        .filter_map(|sent| match sent {
            Sent::Markdown { message, .. } => Some(message.title.clone()),
            Sent::Text { .. } => None,
        })
        .collect()
}
