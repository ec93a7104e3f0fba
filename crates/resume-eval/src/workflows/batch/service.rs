use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::domain::{BatchOptions, BatchReport, CandidateItem, ItemResult, ResultType};
use super::duplicates::{DuplicateCheckResult, DuplicateDetector};
use super::evaluator::{EvaluationClient, EvaluationError, EvaluationRequest, EVALUATION_DEADLINE};
use super::events::{BatchStage, EventSink, ProgressEvent};
use super::fetcher::{CredentialStore, FetchCredentials, FetchError, ItemFetcher};
use super::scoring::score_report;
use crate::config::BatchConfig;
use crate::workflows::candidates::{
    CandidateDraft, CandidateId, CandidateRecord, CandidateRepository, OwnerId, RepositoryError,
};
use crate::workflows::notify::PushError;

/// Receives the successfully evaluated records of a finished run, best score first.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn batch_completed(
        &self,
        owner: OwnerId,
        candidates: Vec<CandidateRecord>,
    ) -> Result<(), PushError>;
}

/// How a run ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Stopped for confirmation; re-invoke with `skip_duplicates` or `force_reevaluate`.
    DuplicatesFound(DuplicateCheckResult),
    Completed(BatchReport),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no HR credentials stored for owner {0}")]
    MissingCredentials(OwnerId),
    #[error(transparent)]
    Credentials(#[from] RepositoryError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Fetches, deduplicates and evaluates candidate items under a bounded worker pool.
pub struct BatchEvaluationService<R> {
    repository: Arc<R>,
    detector: DuplicateDetector<R>,
    client: Arc<dyn EvaluationClient>,
    fetcher: Arc<dyn ItemFetcher>,
    credentials: Arc<dyn CredentialStore>,
    notifier: Option<Arc<dyn CompletionNotifier>>,
    concurrency: usize,
    deadline: Duration,
}

impl<R> BatchEvaluationService<R>
where
    R: CandidateRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        client: Arc<dyn EvaluationClient>,
        fetcher: Arc<dyn ItemFetcher>,
        credentials: Arc<dyn CredentialStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(repository.clone()),
            repository,
            client,
            fetcher,
            credentials,
            notifier: None,
            concurrency: BatchConfig::from_requested(config.concurrency as i64).concurrency,
            deadline: EVALUATION_DEADLINE,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn credentials_for(&self, owner: OwnerId) -> Result<FetchCredentials, BatchError> {
        self.credentials
            .credentials(owner)?
            .ok_or(BatchError::MissingCredentials(owner))
    }

    /// Run detached from the caller so a dropped stream never cancels evaluation work.
    pub fn spawn_run(
        self: Arc<Self>,
        owner: OwnerId,
        credentials: FetchCredentials,
        options: BatchOptions,
        sink: EventSink,
    ) -> JoinHandle<Result<BatchOutcome, BatchError>> {
        tokio::spawn(async move { self.run(owner, &credentials, options, &sink).await })
    }

    /// Fetch from the HR system, then evaluate. Fetch failures end the stream with `error`.
    pub async fn run(
        &self,
        owner: OwnerId,
        credentials: &FetchCredentials,
        options: BatchOptions,
        sink: &EventSink,
    ) -> Result<BatchOutcome, BatchError> {
        sink.emit(ProgressEvent::status(BatchStage::Fetching)).await;

        let items = match self.fetcher.fetch(credentials).await {
            Ok(items) => items,
            Err(err) => {
                error!(%owner, error = %err, "candidate fetch failed");
                sink.emit(ProgressEvent::Error {
                    error: err.to_string(),
                })
                .await;
                return Err(err.into());
            }
        };
        info!(%owner, fetched = items.len(), "candidate items fetched");

        Ok(self.evaluate(owner, items, options, sink).await)
    }

    pub async fn evaluate(
        &self,
        owner: OwnerId,
        items: Vec<CandidateItem>,
        options: BatchOptions,
        sink: &EventSink,
    ) -> BatchOutcome {
        sink.emit(ProgressEvent::status(BatchStage::Checking)).await;

        let apply_ids: Vec<String> = items
            .iter()
            .filter(|item| !item.apply_id.is_empty())
            .map(|item| item.apply_id.clone())
            .collect();
        let names: HashMap<String, String> = items
            .iter()
            .map(|item| (item.apply_id.clone(), item.name.clone()))
            .collect();
        let check = self.detector.check(owner, &apply_ids, &names);

        if check.duplicate_count > 0 && !options.force_reevaluate && !options.skip_duplicates {
            info!(%owner, duplicates = check.duplicate_count, "awaiting duplicate confirmation");
            sink.emit(ProgressEvent::duplicates_found(&check)).await;
            return BatchOutcome::DuplicatesFound(check);
        }

        // Forced runs re-evaluate every duplicate, so nothing counts as skipped.
        let skipped = if options.force_reevaluate {
            0
        } else {
            check.duplicate_count
        };
        let work: Vec<CandidateItem> = if options.force_reevaluate {
            items
        } else {
            items
                .into_iter()
                .filter(|item| !check.is_duplicate(&item.apply_id))
                .collect()
        };

        if work.is_empty() {
            sink.emit(ProgressEvent::nothing_to_evaluate(skipped)).await;
            return BatchOutcome::Completed(BatchReport::rank(Vec::new(), skipped));
        }

        let total = work.len();
        info!(%owner, total, skipped, concurrency = self.concurrency, "starting batch evaluation");
        sink.emit(ProgressEvent::Total { total, skipped }).await;
        sink.emit(ProgressEvent::evaluating(total)).await;

        let (results, mut records) = self.evaluate_work_set(owner, work, options, sink).await;

        let report = BatchReport::rank(results, skipped);
        info!(
            %owner,
            total = report.total,
            new = report.new_count,
            reevaluated = report.reevaluated_count,
            "batch evaluation finished"
        );
        sink.emit(ProgressEvent::complete(&report)).await;

        let ranked: Vec<CandidateRecord> = report
            .results
            .iter()
            .filter_map(|result| result.candidate_id)
            .filter_map(|id| records.remove(&id))
            .collect();
        self.submit_auto_push(owner, ranked);

        BatchOutcome::Completed(report)
    }

    async fn evaluate_work_set(
        &self,
        owner: OwnerId,
        work: Vec<CandidateItem>,
        options: BatchOptions,
        sink: &EventSink,
    ) -> (Vec<ItemResult>, HashMap<CandidateId, CandidateRecord>) {
        let total = work.len();
        let context = Arc::new(TaskContext {
            repository: self.repository.clone(),
            client: self.client.clone(),
            owner,
            options,
            total,
            deadline: self.deadline,
            completed: Mutex::new(0),
            sink: sink.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut handles = Vec::with_capacity(total);
        for item in work.iter().cloned() {
            let context = context.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await.ok();
                let evaluated = context.evaluate_item(item).await;
                // A slow reader must only stall this task, not the next evaluation.
                drop(permit);
                context.report(&evaluated.0).await;
                evaluated
            }));
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; total];
        let mut records = HashMap::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((result, record)) => {
                    if let Some(record) = record {
                        records.insert(record.id, record);
                    }
                    slots[index] = Some(result);
                }
                Err(join_error) => {
                    error!(index, error = %join_error, "evaluation task aborted");
                    slots[index] = Some(ItemResult::failed(
                        &work[index],
                        ResultType::New,
                        format!("evaluation task aborted: {join_error}"),
                    ));
                }
            }
        }

        (slots.into_iter().flatten().collect(), records)
    }

    fn submit_auto_push(&self, owner: OwnerId, candidates: Vec<CandidateRecord>) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        if candidates.is_empty() {
            return;
        }

        tokio::spawn(async move {
            let count = candidates.len();
            if let Err(err) = notifier.batch_completed(owner, candidates).await {
                warn!(%owner, count, error = %err, "auto push after batch failed");
            }
        });
    }
}

struct TaskContext<R> {
    repository: Arc<R>,
    client: Arc<dyn EvaluationClient>,
    owner: OwnerId,
    options: BatchOptions,
    total: usize,
    deadline: Duration,
    /// Held while reporting so `completed` reaches the stream strictly increasing.
    completed: Mutex<usize>,
    sink: EventSink,
}

impl<R> TaskContext<R>
where
    R: CandidateRepository + 'static,
{
    async fn evaluate_item(&self, item: CandidateItem) -> (ItemResult, Option<CandidateRecord>) {
        let name = item.display_name();
        let filename = item.filename();

        let existing = if self.options.force_reevaluate && !item.apply_id.trim().is_empty() {
            match self.repository.find_by_apply_id(self.owner, &item.apply_id) {
                Ok(record) => record,
                Err(err) => {
                    warn!(apply_id = %item.apply_id, error = %err, "lookup of prior evaluation failed");
                    None
                }
            }
        } else {
            None
        };
        let result_type = if existing.is_some() {
            ResultType::Reevaluated
        } else {
            ResultType::New
        };

        let request = EvaluationRequest {
            name: name.clone(),
            job_description: self.options.job_description_for(&item),
            criteria: self.options.criteria.clone(),
            filename: filename.clone(),
            resume: item.resume.clone(),
        };
        let (report, client_error) =
            match tokio::time::timeout(self.deadline, self.client.evaluate(&request)).await {
                Ok(Ok(report)) => (Some(report), None),
                Ok(Err(err)) => (None, Some(err)),
                Err(_) => (None, Some(EvaluationError::Timeout(self.deadline))),
            };
        if let Some(err) = &client_error {
            error!(candidate = %name, error = %err, "evaluation call failed; continuing without report");
        }
        let client_error = client_error.map(|err| err.to_string());

        let outcome = match score_report(report.as_ref()) {
            Ok(card) => {
                let draft =
                    card.into_draft(self.owner, &item.apply_id, &name, &filename, Local::now());
                self.persist(existing, draft)
                    .map_err(|err| client_error.clone().unwrap_or_else(|| err.to_string()))
            }
            Err(err) => Err(client_error.clone().unwrap_or_else(|| err.to_string())),
        };

        let (result, record) = match outcome {
            Ok(record) => (ItemResult::evaluated(&record, result_type), Some(record)),
            Err(message) => {
                warn!(candidate = %name, error = %message, "candidate evaluation failed");
                (ItemResult::failed(&item, result_type, message), None)
            }
        };

        (result, record)
    }

    async fn report(&self, result: &ItemResult) {
        let mut completed = self.completed.lock().await;
        *completed += 1;
        self.sink
            .emit(ProgressEvent::progress(
                *completed,
                self.total,
                result.candidate_name.clone(),
                result.result_type,
            ))
            .await;
    }

    fn persist(
        &self,
        existing: Option<CandidateRecord>,
        draft: CandidateDraft,
    ) -> Result<CandidateRecord, RepositoryError> {
        match existing {
            Some(mut record) => {
                record.apply_evaluation(draft, Utc::now());
                self.repository.update(record.clone())?;
                Ok(record)
            }
            None => self.repository.insert(draft),
        }
    }
}
