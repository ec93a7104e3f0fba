use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use resume_eval::config::FetchConfig;
use resume_eval::workflows::batch::{CredentialStore, FetchCredentials};
use resume_eval::workflows::candidates::{
    CandidateDraft, CandidateId, CandidateRecord, CandidateRepository, OwnerId, RepositoryError,
};
use resume_eval::workflows::notify::{NotifyConfig, NotifyConfigStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local candidate storage; records live as long as the server.
#[derive(Default)]
pub(crate) struct InMemoryCandidateRepository {
    records: Mutex<HashMap<CandidateId, CandidateRecord>>,
    next_id: AtomicU64,
}

impl InMemoryCandidateRepository {
    fn records(&self) -> MutexGuard<'_, HashMap<CandidateId, CandidateRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CandidateRepository for InMemoryCandidateRepository {
    fn insert(&self, draft: CandidateDraft) -> Result<CandidateRecord, RepositoryError> {
        let mut guard = self.records();
        if !draft.apply_id.is_empty()
            && guard
                .values()
                .any(|record| record.owner == draft.owner && record.apply_id == draft.apply_id)
        {
            return Err(RepositoryError::Conflict(draft.apply_id));
        }

        let id = CandidateId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = CandidateRecord::from_draft(id, draft, Utc::now());
        guard.insert(id, record.clone());
        Ok(record)
    }

    fn update(&self, record: CandidateRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records();
        match guard.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: CandidateId) -> Result<Option<CandidateRecord>, RepositoryError> {
        Ok(self.records().get(&id).cloned())
    }

    fn find_by_apply_id(
        &self,
        owner: OwnerId,
        apply_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError> {
        Ok(self
            .records()
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
            .records()
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
        let mut pending: Vec<CandidateRecord> = self
            .records()
            .values()
            .filter(|record| record.owner == owner && record.is_unnotified())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        pending.truncate(limit);
        Ok(pending)
    }
}

/// Robot settings loaded once from the environment.
pub(crate) struct StaticNotifyConfigStore {
    config: NotifyConfig,
}

impl StaticNotifyConfigStore {
    pub(crate) fn new(config: NotifyConfig) -> Self {
        Self { config }
    }
}

impl NotifyConfigStore for StaticNotifyConfigStore {
    fn active(&self) -> Result<Option<NotifyConfig>, RepositoryError> {
        Ok(Some(self.config.clone()))
    }

    fn for_owner(&self, owner: OwnerId) -> Result<Option<NotifyConfig>, RepositoryError> {
        Ok((self.config.owner == owner).then(|| self.config.clone()))
    }
}

/// Every owner shares the HR login configured for the deployment.
pub(crate) struct ConfigCredentialStore {
    credentials: FetchCredentials,
}

impl ConfigCredentialStore {
    pub(crate) fn new(config: &FetchConfig) -> Self {
        Self {
            credentials: config.credentials.clone(),
        }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn credentials(&self, _owner: OwnerId) -> Result<Option<FetchCredentials>, RepositoryError> {
        if self.credentials.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.credentials.clone()))
    }
}
