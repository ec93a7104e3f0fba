//! Persisted candidate records shared by batch evaluation and chat notifications.
//!
//! Storage itself is an injected collaborator; this module only fixes the record shape and the
//! queries the workflows rely on.

pub mod domain;
pub mod repository;

pub use domain::{
    CandidateDraft, CandidateId, CandidateRecord, CandidateStatus, DimensionScore,
    DimensionScores, OwnerId,
};
pub use repository::{CandidateRepository, RepositoryError};

use axum::http::HeaderMap;

/// Header carrying the authenticated owner, set by the upstream gateway.
pub const OWNER_HEADER: &str = "x-owner-id";

pub fn owner_from_headers(headers: &HeaderMap) -> Option<OwnerId> {
    headers
        .get(OWNER_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(OwnerId)
}
