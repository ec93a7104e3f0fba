//! Batch resume evaluation: fetch candidate items from the HR system, partition out the ones
//! already evaluated, score the rest against the AI workflow under a bounded worker pool and
//! stream typed progress events back to the caller.

pub mod domain;
pub mod duplicates;
pub mod evaluator;
pub mod events;
pub mod fetcher;
pub mod router;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{BatchOptions, BatchReport, CandidateItem, ItemResult, ResultType};
pub use duplicates::{DuplicateCheckResult, DuplicateDetector, DuplicateSummary};
pub use evaluator::{
    EvaluationClient, EvaluationError, EvaluationRequest, WorkflowEvaluationClient, WorkflowReport,
};
pub use events::{BatchStage, EventSink, ProgressEvent};
pub use fetcher::{CredentialStore, FetchCredentials, FetchError, ItemFetcher, ScriptItemFetcher};
pub use router::batch_router;
pub use scoring::{score_report, ScoreCard, ScoringError};
pub use service::{BatchError, BatchEvaluationService, BatchOutcome, CompletionNotifier};
