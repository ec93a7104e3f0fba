use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflows::candidates::{CandidateId, CandidateRecord};

/// One application pulled from the upstream HR system. Lives for a single batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateItem {
    pub name: String,
    pub apply_id: String,
    pub resume_id: String,
    /// Raw job posting fields as delivered by the HR system.
    pub job: BTreeMap<String, Value>,
    pub resume: Vec<u8>,
}

const POSTING_KEYS: [&str; 2] = ["serviceCondition", "workContent"];
const PROJECT_KEYS: [&str; 3] = ["title", "description", "requirements"];

impl CandidateItem {
    /// Job description text assembled from the posting fields, blank-line separated.
    pub fn job_description(&self) -> String {
        let posting = self.join_fields(&POSTING_KEYS);
        if !posting.is_empty() {
            return posting;
        }
        self.join_fields(&PROJECT_KEYS)
    }

    pub fn display_name(&self) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            "unknown".to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn filename(&self) -> String {
        format!("{}.pdf", self.display_name())
    }

    fn join_fields(&self, keys: &[&str]) -> String {
        keys.iter()
            .filter_map(|key| self.job.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Per-item classification reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    New,
    Reevaluated,
    Skipped,
}

/// Caller-supplied switches for one batch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub jd: String,
    pub criteria: String,
    pub force_reevaluate: bool,
    pub skip_duplicates: bool,
}

impl BatchOptions {
    /// Explicit request text wins over the item's own posting.
    pub fn job_description_for(&self, item: &CandidateItem) -> String {
        if self.jd.trim().is_empty() {
            item.job_description()
        } else {
            self.jd.clone()
        }
    }
}

/// Outcome for one work-set item, serialized into `complete` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateId>,
    pub candidate_name: String,
    pub apply_id: String,
    pub total_score: f64,
    pub grade: String,
    pub jd_match: i32,
    pub age_score: i32,
    pub experience_score: i32,
    pub education_score: i32,
    pub company_score: i32,
    pub tech_score: i32,
    pub project_score: i32,
    pub recommendation: String,
    pub report_markdown: String,
    pub rank: usize,
    pub result_type: ResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn evaluated(record: &CandidateRecord, result_type: ResultType) -> Self {
        Self {
            filename: record.filename.clone(),
            candidate_id: Some(record.id),
            candidate_name: record.name.clone(),
            apply_id: record.apply_id.clone(),
            total_score: record.total_score,
            grade: record.grade.clone(),
            jd_match: record.jd_match,
            age_score: record.dimensions.age.score,
            experience_score: record.dimensions.experience.score,
            education_score: record.dimensions.education.score,
            company_score: record.dimensions.company.score,
            tech_score: record.dimensions.tech.score,
            project_score: record.dimensions.project.score,
            recommendation: record.recommendation.clone(),
            report_markdown: record.report_markdown.clone(),
            rank: 0,
            result_type,
            error: None,
        }
    }

    pub fn failed(item: &CandidateItem, result_type: ResultType, error: String) -> Self {
        Self {
            filename: item.filename(),
            candidate_id: None,
            candidate_name: item.display_name(),
            apply_id: item.apply_id.clone(),
            total_score: 0.0,
            grade: String::new(),
            jd_match: 0,
            age_score: 0,
            experience_score: 0,
            education_score: 0,
            company_score: 0,
            tech_score: 0,
            project_score: 0,
            recommendation: String::new(),
            report_markdown: String::new(),
            rank: 0,
            result_type,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.candidate_id.is_some()
    }
}

/// Ranked results of a finished batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub results: Vec<ItemResult>,
    pub new_count: usize,
    pub reevaluated_count: usize,
    pub skipped_count: usize,
}

impl BatchReport {
    /// Stable sort by score (ties keep work-set order), then 1-based ranks. Only successful
    /// results count towards the new/reevaluated tallies.
    pub fn rank(mut results: Vec<ItemResult>, skipped_count: usize) -> Self {
        results.sort_by(|left, right| right.total_score.total_cmp(&left.total_score));
        for (index, result) in results.iter_mut().enumerate() {
            result.rank = index + 1;
        }

        let successful = || results.iter().filter(|result| result.is_success());
        let new_count = successful()
            .filter(|result| result.result_type == ResultType::New)
            .count();
        let reevaluated_count = successful()
            .filter(|result| result.result_type == ResultType::Reevaluated)
            .count();

        Self {
            total: results.len(),
            results,
            new_count,
            reevaluated_count,
            skipped_count,
        }
    }
}
