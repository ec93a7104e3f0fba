use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::workflows::candidates::{CandidateRecord, CandidateRepository, OwnerId};

/// Previously evaluated candidate matched by apply id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateSummary {
    pub name: String,
    pub apply_id: String,
    pub evaluated_at: String,
    pub total_score: f64,
    pub grade: String,
}

impl DuplicateSummary {
    fn from_record(record: &CandidateRecord, fetched_name: Option<&String>) -> Self {
        let name = if record.name.trim().is_empty() {
            fetched_name.cloned().unwrap_or_default()
        } else {
            record.name.clone()
        };

        Self {
            name,
            apply_id: record.apply_id.clone(),
            evaluated_at: record.created_label(),
            total_score: record.total_score,
            grade: record.grade.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateCheckResult {
    pub total_fetched: usize,
    pub duplicate_count: usize,
    pub duplicates: Vec<DuplicateSummary>,
    pub new_apply_ids: Vec<String>,
}

impl DuplicateCheckResult {
    pub fn is_duplicate(&self, apply_id: &str) -> bool {
        self.duplicates
            .iter()
            .any(|duplicate| duplicate.apply_id == apply_id)
    }
}

/// Partitions fetched apply ids into already-evaluated and new, per owner.
pub struct DuplicateDetector<R> {
    repository: Arc<R>,
}

impl<R> DuplicateDetector<R>
where
    R: CandidateRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Never fails: a repository error degrades to treating every id as new.
    pub fn check(
        &self,
        owner: OwnerId,
        apply_ids: &[String],
        names: &HashMap<String, String>,
    ) -> DuplicateCheckResult {
        let ids: Vec<String> = apply_ids
            .iter()
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .collect();

        let mut result = DuplicateCheckResult {
            total_fetched: ids.len(),
            ..DuplicateCheckResult::default()
        };
        if ids.is_empty() {
            return result;
        }

        let existing = match self.repository.find_by_apply_ids(owner, &ids) {
            Ok(records) => records,
            Err(error) => {
                warn!(%owner, %error, "duplicate check failed; treating all candidates as new");
                result.new_apply_ids = ids;
                return result;
            }
        };

        let by_apply_id: HashMap<&str, &CandidateRecord> = existing
            .iter()
            .map(|record| (record.apply_id.as_str(), record))
            .collect();

        for id in ids {
            match by_apply_id.get(id.as_str()) {
                Some(record) => result
                    .duplicates
                    .push(DuplicateSummary::from_record(record, names.get(&id))),
                None => result.new_apply_ids.push(id),
            }
        }
        result.duplicate_count = result.duplicates.len();
        result
    }
}
