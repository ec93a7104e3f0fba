use super::domain::{CandidateDraft, CandidateId, CandidateRecord, OwnerId};

/// Storage abstraction so the workflows can be exercised in isolation.
pub trait CandidateRepository: Send + Sync {
    fn insert(&self, draft: CandidateDraft) -> Result<CandidateRecord, RepositoryError>;
    fn update(&self, record: CandidateRecord) -> Result<(), RepositoryError>;
    fn fetch(&self, id: CandidateId) -> Result<Option<CandidateRecord>, RepositoryError>;
    fn find_by_apply_id(
        &self,
        owner: OwnerId,
        apply_id: &str,
    ) -> Result<Option<CandidateRecord>, RepositoryError>;
    fn find_by_apply_ids(
        &self,
        owner: OwnerId,
        apply_ids: &[String],
    ) -> Result<Vec<CandidateRecord>, RepositoryError>;
    /// Records never pushed to chat (`notify_count == 0`), highest score first.
    fn unnotified(&self, owner: OwnerId, limit: usize)
        -> Result<Vec<CandidateRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("candidate with apply id {0} already exists")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
