use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Account that owns evaluated candidates and notification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage identity of a persisted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hiring pipeline state tracked by recruiters after evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    #[default]
    Pending,
    Interviewing,
    Offered,
    Rejected,
}

impl CandidateStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CandidateStatus::Pending => "待面试",
            CandidateStatus::Interviewing => "面试中",
            CandidateStatus::Offered => "已录用",
            CandidateStatus::Rejected => "不合适",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: i32,
    pub reason: String,
}

/// Six scored dimensions with their maxima: age 10, experience 25, education 20,
/// company 15, tech 25, project 15.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub age: DimensionScore,
    pub experience: DimensionScore,
    pub education: DimensionScore,
    pub company: DimensionScore,
    pub tech: DimensionScore,
    pub project: DimensionScore,
}

/// Evaluation output ready to be written, before storage assigns identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateDraft {
    pub owner: OwnerId,
    pub apply_id: String,
    pub name: String,
    pub filename: String,
    pub total_score: f64,
    pub grade: String,
    pub jd_match: i32,
    pub dimensions: DimensionScores,
    pub recommendation: String,
    pub report_markdown: String,
    pub report_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub owner: OwnerId,
    pub apply_id: String,
    pub name: String,
    pub filename: String,
    pub total_score: f64,
    pub grade: String,
    pub jd_match: i32,
    pub dimensions: DimensionScores,
    pub recommendation: String,
    pub report_markdown: String,
    pub report_json: String,
    pub status: CandidateStatus,
    pub notes: String,
    pub notify_count: u32,
    pub first_notify_at: Option<DateTime<Utc>>,
    pub last_notify_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    /// Materialise a fresh record from a draft.
    pub fn from_draft(id: CandidateId, draft: CandidateDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: draft.owner,
            apply_id: draft.apply_id,
            name: draft.name,
            filename: draft.filename,
            total_score: draft.total_score,
            grade: draft.grade,
            jd_match: draft.jd_match,
            dimensions: draft.dimensions,
            recommendation: draft.recommendation,
            report_markdown: draft.report_markdown,
            report_json: draft.report_json,
            status: CandidateStatus::Pending,
            notes: String::new(),
            notify_count: 0,
            first_notify_at: None,
            last_notify_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the evaluation fields in place; identity, ownership, apply id, pipeline
    /// status and `created_at` survive a re-evaluation.
    pub fn apply_evaluation(&mut self, draft: CandidateDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.filename = draft.filename;
        self.total_score = draft.total_score;
        self.grade = draft.grade;
        self.jd_match = draft.jd_match;
        self.dimensions = draft.dimensions;
        self.recommendation = draft.recommendation;
        self.report_markdown = draft.report_markdown;
        self.report_json = draft.report_json;
        self.updated_at = now;
    }

    pub fn mark_notified(&mut self, now: DateTime<Utc>) {
        self.notify_count += 1;
        if self.first_notify_at.is_none() {
            self.first_notify_at = Some(now);
        }
        self.last_notify_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_unnotified(&self) -> bool {
        self.notify_count == 0
    }

    /// Creation time rendered in the server's local zone, minute precision.
    pub fn created_label(&self) -> String {
        self.created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}
