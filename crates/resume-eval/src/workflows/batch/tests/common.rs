use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::BatchConfig;
use crate::workflows::batch::domain::CandidateItem;
use crate::workflows::batch::evaluator::{
    EvaluationClient, EvaluationError, EvaluationRequest, WorkflowReport,
};
use crate::workflows::batch::events::ProgressEvent;
use crate::workflows::batch::fetcher::{CredentialStore, FetchCredentials, FetchError, ItemFetcher};
use crate::workflows::batch::service::{BatchEvaluationService, CompletionNotifier};
use crate::workflows::candidates::{
    CandidateDraft, CandidateId, CandidateRecord, CandidateRepository, OwnerId, RepositoryError,
};
use crate::workflows::notify::PushError;

pub(super) const OWNER: OwnerId = OwnerId(42);

pub(super) fn item(name: &str, apply_id: &str) -> CandidateItem {
    let mut job = BTreeMap::new();
    job.insert(
        "workContent".to_string(),
        Value::String("负责交易系统后端开发".to_string()),
    );
    CandidateItem {
        name: name.to_string(),
        apply_id: apply_id.to_string(),
        resume_id: format!("R-{apply_id}"),
        job,
        resume: b"%PDF-1.4".to_vec(),
    }
}

pub(super) fn items(count: usize) -> Vec<CandidateItem> {
    (1..=count)
        .map(|index| item(&format!("候选人{index}"), &format!("AP-{index}")))
        .collect()
}

pub(super) fn report_json(total_score: f64) -> String {
    json!({
        "基本信息": { "姓名": "候选人", "最终得分": total_score, "评级": "B", "学历": "本科" },
        "JD匹配度": {
            "匹配分数": 72,
            "匹配总结": "核心技能匹配",
            "匹配的技能": ["Rust"],
            "缺失的技能": [],
        },
        "各维度得分": {
            "年龄": { "得分": 8, "说明": "29岁" },
            "工作经验": { "得分": 18, "说明": "4年" },
            "学历背景": { "得分": 15, "说明": "本科" },
            "公司背景": { "得分": 10, "说明": "中型企业" },
            "技术能力": { "得分": 20, "说明": "扎实" },
            "项目经历": { "得分": 10, "说明": "参与核心项目" },
        },
        "录用建议": { "结论": "推荐" },
    })
    .to_string()
}

pub(super) fn draft(apply_id: &str, name: &str, total_score: f64) -> CandidateDraft {
    CandidateDraft {
        owner: OWNER,
        apply_id: apply_id.to_string(),
        name: name.to_string(),
        filename: format!("{name}.pdf"),
        total_score,
        grade: "B".to_string(),
        jd_match: 60,
        recommendation: "待定".to_string(),
        ..CandidateDraft::default()
    }
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    pub(super) records: Mutex<HashMap<CandidateId, CandidateRecord>>,
    next_id: AtomicU64,
    unavailable: bool,
}

impl MemoryRepository {
    pub(super) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub(super) fn seed(&self, draft: CandidateDraft) -> CandidateRecord {
        self.insert(draft).expect("seed insert")
    }

    pub(super) fn all(&self) -> Vec<CandidateRecord> {
        let mut records: Vec<CandidateRecord> = self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        Ok(())
    }
}

impl CandidateRepository for MemoryRepository {
    fn insert(&self, draft: CandidateDraft) -> Result<CandidateRecord, RepositoryError> {
        self.check()?;
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard
            .values()
            .any(|record| record.owner == draft.owner && record.apply_id == draft.apply_id)
        {
            return Err(RepositoryError::Conflict(draft.apply_id));
        }
        let id = CandidateId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = CandidateRecord::from_draft(id, draft, Utc::now());
        guard.insert(id, record.clone());
        Ok(record)
    }

    fn update(&self, record: CandidateRecord) -> Result<(), RepositoryError> {
        self.check()?;
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if !guard.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(record.id, record);
        Ok(())
    }

    fn fetch(&self, id: CandidateId) -> Result<Option<CandidateRecord>, RepositoryError> {
        self.check()?;
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(&id).cloned())
    }

    fn find_by_apply_id(
        &self,
        owner: OwnerId,
        apply_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError> {
        self.check()?;
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .find(|record| record.owner == owner && record.apply_id == apply_id)
            .cloned())
    }

    fn find_by_apply_ids(
        &self,
        owner: OwnerId,
        apply_ids: &[String],
    ) -> Result<Vec<CandidateRecord>, RepositoryError> {
        self.check()?;
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
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
        self.check()?;
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut records: Vec<CandidateRecord> = guard
            .values()
            .filter(|record| record.owner == owner && record.is_unnotified())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        records.truncate(limit);
        Ok(records)
    }
}

/// Evaluation double that tracks how many calls overlap.
#[derive(Default)]
pub(super) struct ScriptedClient {
    scores: HashMap<String, f64>,
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub(super) max_in_flight: AtomicUsize,
    pub(super) calls: AtomicUsize,
    pub(super) criteria: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(super) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(super) fn with_score(mut self, name: &str, score: f64) -> Self {
        self.scores.insert(name.to_string(), score);
        self
    }

    pub(super) fn failing_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

#[async_trait]
impl EvaluationClient for ScriptedClient {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<WorkflowReport, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.criteria
            .lock()
            .expect("criteria mutex poisoned")
            .push(request.criteria.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&request.name) {
            return Err(EvaluationError::Api {
                code: 5000,
                message: "workflow quota exhausted".to_string(),
            });
        }
        let score = self.scores.get(&request.name).copied().unwrap_or(70.0);
        Ok(WorkflowReport::from_output(report_json(score)))
    }
}

pub(super) struct StaticFetcher {
    items: Vec<CandidateItem>,
    failure: Option<String>,
}

impl StaticFetcher {
    pub(super) fn new(items: Vec<CandidateItem>) -> Self {
        Self {
            items,
            failure: None,
        }
    }

    pub(super) fn failing(stderr: &str) -> Self {
        Self {
            items: Vec::new(),
            failure: Some(stderr.to_string()),
        }
    }
}

#[async_trait]
impl ItemFetcher for StaticFetcher {
    async fn fetch(
        &self,
        _credentials: &FetchCredentials,
    ) -> Result<Vec<CandidateItem>, FetchError> {
        match &self.failure {
            Some(stderr) => Err(FetchError::Exit {
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            }),
            None => Ok(self.items.clone()),
        }
    }
}

#[derive(Default)]
pub(super) struct MemoryCredentials {
    by_owner: HashMap<OwnerId, FetchCredentials>,
}

impl MemoryCredentials {
    pub(super) fn for_owner(owner: OwnerId) -> Self {
        let mut credentials = FetchCredentials::new();
        credentials.insert("WT_USERNAME".to_string(), "hr@example.com".to_string());
        credentials.insert("WT_PASSWORD".to_string(), "secret".to_string());
        let mut by_owner = HashMap::new();
        by_owner.insert(owner, credentials);
        Self { by_owner }
    }
}

impl CredentialStore for MemoryCredentials {
    fn credentials(&self, owner: OwnerId) -> Result<Option<FetchCredentials>, RepositoryError> {
        Ok(self.by_owner.get(&owner).cloned())
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    pub(super) calls: Mutex<Vec<(OwnerId, Vec<CandidateRecord>)>>,
}

impl RecordingNotifier {
    pub(super) async fn wait_for_call(&self) -> Option<(OwnerId, Vec<CandidateRecord>)> {
        for _ in 0..100 {
            if let Some(call) = self.calls.lock().expect("notifier mutex poisoned").first() {
                return Some(call.clone());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn batch_completed(
        &self,
        owner: OwnerId,
        candidates: Vec<CandidateRecord>,
    ) -> Result<(), PushError> {
        self.calls
            .lock()
            .expect("notifier mutex poisoned")
            .push((owner, candidates));
        Ok(())
    }
}

pub(super) fn build_service(
    repository: Arc<MemoryRepository>,
    client: Arc<ScriptedClient>,
    fetcher: StaticFetcher,
    concurrency: usize,
) -> BatchEvaluationService<MemoryRepository> {
    BatchEvaluationService::new(
        repository,
        client,
        Arc::new(fetcher),
        Arc::new(MemoryCredentials::for_owner(OWNER)),
        BatchConfig { concurrency },
    )
}

pub(super) async fn drain(mut receiver: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

pub(super) fn names(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(ProgressEvent::name).collect()
}

pub(super) async fn read_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
