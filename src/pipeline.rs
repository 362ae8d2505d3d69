use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::export::{self, ExportFile, ExportFormat};
use crate::ingestion::{ingest_file, UploadedFile};
use crate::models::{
    InputFileSummary, JobStatus, PairDisposition, PairResult, Recommendation,
    ReconciliationJob, ReviewItem, ReviewSubmission, SourceSystem, Transaction,
};
use crate::orchestrator::{CancellationFlag, ScoringOrchestrator};
use crate::pairing::{BlockingPairing, PairingStrategy};
use crate::review::ReviewQueue;
use crate::validator::validate_transactions;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

struct JobEntry {
    job: ReconciliationJob,
    /// Uploaded files, released once ingested.
    files: Vec<UploadedFile>,
    cancel: CancellationFlag,
}

/// Everything a run produces before it is written back to the job.
#[derive(Default)]
struct RunReport {
    input_files: Vec<InputFileSummary>,
    results: Vec<PairResult>,
    errors: Vec<String>,
    warnings: Vec<String>,
    failed: bool,
}

impl RunReport {
    fn fail(mut self, reason: impl Into<String>) -> Self {
        self.errors.push(reason.into());
        self.failed = true;
        self
    }
}

/// Runs reconciliation jobs and keeps them in memory.
///
/// Row- and pair-level problems are recorded on the job and never abort it. A job
/// fails only when a side has no valid transactions, it exceeds the transaction
/// limit, or it is cancelled.
pub struct ReconciliationService {
    config: Config,
    orchestrator: ScoringOrchestrator,
    pairing: Arc<dyn PairingStrategy>,
    reviews: Arc<ReviewQueue>,
    jobs: DashMap<Uuid, JobEntry>,
}

impl ReconciliationService {
    pub fn new(
        config: Config,
        orchestrator: ScoringOrchestrator,
        reviews: Arc<ReviewQueue>,
    ) -> Self {
        let pairing = Arc::new(BlockingPairing::new(config.pairing_date_window_days));
        Self {
            config,
            orchestrator,
            pairing,
            reviews,
            jobs: DashMap::new(),
        }
    }

    pub fn with_pairing(mut self, pairing: Arc<dyn PairingStrategy>) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn orchestrator(&self) -> &ScoringOrchestrator {
        &self.orchestrator
    }

    /// Register an upload set. Needs one POS file and at least one rewards file.
    pub fn create_job(&self, files: Vec<UploadedFile>) -> Result<Uuid, AppError> {
        if !files.iter().any(|f| f.source_system == SourceSystem::Pos) {
            return Err(AppError::BadRequest(
                "POS transactions file is required".to_string(),
            ));
        }
        if !files.iter().any(|f| f.source_system.is_reward()) {
            return Err(AppError::BadRequest(
                "At least one rewards file (alle or aspire) is required".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let mut job = ReconciliationJob::new(job_id);
        job.input_files = files
            .iter()
            .map(|f| InputFileSummary {
                file_name: f.file_name.clone(),
                source_system: f.source_system,
                total_rows: 0,
                valid_rows: 0,
            })
            .collect();

        tracing::info!("Created job {} with {} files", job_id, files.len());
        self.jobs.insert(
            job_id,
            JobEntry {
                job,
                files,
                cancel: CancellationFlag::new(),
            },
        );
        Ok(job_id)
    }

    /// Current job state with review counts read live.
    pub fn job(&self, job_id: &Uuid) -> Result<ReconciliationJob, AppError> {
        let mut job = self
            .jobs
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| not_found(job_id))?;
        if job.summary.is_some() {
            let reviews = self.reviews.list_for_job(job_id);
            job.summary = Some(export::summarize(&job.results, &reviews));
        }
        Ok(job)
    }

    /// Ingest, validate, pair, score, classify and route one uploaded job.
    pub async fn run_job(&self, job_id: Uuid) -> Result<ReconciliationJob, AppError> {
        let (files, cancel) = {
            let mut entry = self.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
            if entry.job.status != JobStatus::Uploaded {
                return Err(AppError::BadRequest(format!(
                    "Job {} is already {:?}",
                    job_id, entry.job.status
                )));
            }
            entry.job.status = JobStatus::Processing;
            (std::mem::take(&mut entry.files), entry.cancel.clone())
        };

        tracing::info!("Processing job {}", job_id);
        let report = self.execute(job_id, files, &cancel).await;

        {
            let mut entry = self.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
            let job = &mut entry.job;
            job.input_files = report.input_files;
            job.errors.extend(report.errors);
            job.warnings.extend(report.warnings);
            job.results = report.results;
            job.summary = Some(export::summarize(
                &job.results,
                &self.reviews.list_for_job(&job_id),
            ));
            job.status = if report.failed {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            job.completed_at = Some(Utc::now());

            match job.status {
                JobStatus::Failed => {
                    tracing::error!("Job {} failed: {}", job_id, job.errors.join("; "))
                }
                _ => tracing::info!(
                    "Job {} completed: {} pairs, {} errors, {} warnings",
                    job_id,
                    job.results.len(),
                    job.errors.len(),
                    job.warnings.len()
                ),
            }
        }

        self.job(&job_id)
    }

    async fn execute(
        &self,
        job_id: Uuid,
        mut files: Vec<UploadedFile>,
        cancel: &CancellationFlag,
    ) -> RunReport {
        let mut report = RunReport::default();
        let mut pos: Vec<Transaction> = Vec::new();
        let mut rewards: Vec<Transaction> = Vec::new();

        // Rewards are concatenated alle first, then aspire.
        files.sort_by_key(|f| f.source_system);

        for (ordinal, file) in files.iter().enumerate() {
            let outcome = match ingest_file(
                file,
                ordinal,
                self.config.max_upload_bytes,
                self.config.date_fallback(),
            )
            .with_context(|| format!("{} file {}", file.source_system, file.file_name))
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file.file_name, e);
                    report.errors.push(e.to_string());
                    report.input_files.push(InputFileSummary {
                        file_name: file.file_name.clone(),
                        source_system: file.source_system,
                        total_rows: 0,
                        valid_rows: 0,
                    });
                    continue;
                }
            };

            let validated = validate_transactions(outcome.transactions);
            report.input_files.push(InputFileSummary {
                file_name: outcome.file_name.clone(),
                source_system: outcome.source_system,
                total_rows: outcome.total_rows,
                valid_rows: validated.valid_count(),
            });
            report.errors.extend(
                validated
                    .errors
                    .into_iter()
                    .map(|e| format!("{}: {}", outcome.file_name, e)),
            );
            report.warnings.extend(
                outcome
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {}", outcome.file_name, w)),
            );

            if outcome.source_system.is_reward() {
                rewards.extend(validated.valid_transactions);
            } else {
                pos.extend(validated.valid_transactions);
            }
        }

        let total = pos.len() + rewards.len();
        if total > self.config.max_transactions_per_job {
            return report.fail(format!(
                "Job has {} transactions, exceeding the limit of {}",
                total, self.config.max_transactions_per_job
            ));
        }
        if pos.is_empty() {
            return report.fail("No valid POS transactions found");
        }
        if rewards.is_empty() {
            return report.fail("No valid rewards transactions found");
        }

        let pairing = self.pairing.pair(&rewards, &pos);
        tracing::info!(
            "Job {}: {} pairs from {} rewards and {} POS rows ({} strategy)",
            job_id,
            pairing.pairs.len(),
            rewards.len(),
            pos.len(),
            self.pairing.name()
        );
        report.warnings.extend(pairing.unpaired_rewards.iter().map(|t| {
            format!(
                "Reward transaction {} ({}) has no POS candidate",
                t.id, t.customer_name
            )
        }));

        let mut results = self.orchestrator.score_pairs(pairing.pairs, cancel).await;
        self.route_reviews(job_id, &mut results);
        report.results = results;

        if cancel.is_cancelled() {
            return report.fail("Job cancelled");
        }
        report
    }

    fn route_reviews(&self, job_id: Uuid, results: &mut [PairResult]) {
        for result in results.iter_mut() {
            if result.review_item_id.is_some() {
                continue;
            }
            if let PairDisposition::Scored {
                score,
                recommendation: Recommendation::ManualReview,
                ..
            } = &result.disposition
            {
                let id = self
                    .reviews
                    .enqueue(job_id, result.pair.clone(), score.clone());
                result.review_item_id = Some(id);
            }
        }
    }

    /// Re-score only the `ScoringFailed` pairs of a completed job.
    pub async fn retry_failed(&self, job_id: Uuid) -> Result<ReconciliationJob, AppError> {
        let (failed, cancel) = {
            let mut entry = self.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
            if entry.job.status != JobStatus::Completed {
                return Err(AppError::BadRequest(format!(
                    "Only completed jobs can be retried, job {} is {:?}",
                    job_id, entry.job.status
                )));
            }
            let failed: Vec<(usize, PairResult)> = entry
                .job
                .results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.disposition.is_failed())
                .map(|(i, r)| (i, r.clone()))
                .collect();
            if failed.is_empty() {
                drop(entry);
                return self.job(&job_id);
            }
            entry.job.status = JobStatus::Processing;
            entry.cancel = CancellationFlag::new();
            (failed, entry.cancel.clone())
        };

        tracing::info!("Retrying {} failed pairs of job {}", failed.len(), job_id);
        let (positions, pairs): (Vec<usize>, Vec<_>) =
            failed.into_iter().map(|(i, r)| (i, r.pair)).unzip();
        let mut rescored = self.orchestrator.score_pairs(pairs, &cancel).await;
        self.route_reviews(job_id, &mut rescored);

        {
            let mut entry = self.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
            let job = &mut entry.job;
            for (position, result) in positions.into_iter().zip(rescored) {
                job.results[position] = result;
            }
            if cancel.is_cancelled() {
                job.status = JobStatus::Failed;
                job.errors.push("Job cancelled".to_string());
            } else {
                job.status = JobStatus::Completed;
            }
            job.completed_at = Some(Utc::now());
        }

        self.job(&job_id)
    }

    /// Request cooperative cancellation. A job that has not started fails at once;
    /// finished jobs cannot be cancelled.
    pub fn cancel(&self, job_id: &Uuid) -> Result<JobStatus, AppError> {
        let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| not_found(job_id))?;
        if entry.job.status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "Job {} is already {:?}",
                job_id, entry.job.status
            )));
        }
        entry.cancel.cancel();

        if entry.job.status == JobStatus::Uploaded {
            entry.job.status = JobStatus::Failed;
            entry.job.errors.push("Job cancelled".to_string());
            entry.job.completed_at = Some(Utc::now());
            entry.files.clear();
        }
        tracing::info!("Cancellation requested for job {}", job_id);
        Ok(entry.job.status)
    }

    pub fn reviews_for_job(&self, job_id: &Uuid) -> Result<Vec<ReviewItem>, AppError> {
        if !self.jobs.contains_key(job_id) {
            return Err(not_found(job_id));
        }
        Ok(self.reviews.list_for_job(job_id))
    }

    pub fn decide_review(&self, submission: ReviewSubmission) -> Result<ReviewItem, AppError> {
        self.reviews.decide(submission)
    }

    /// Export a job's results with the current review decisions.
    pub fn export(&self, job_id: &Uuid, format: ExportFormat) -> Result<ExportFile, AppError> {
        let results = self
            .jobs
            .get(job_id)
            .map(|entry| entry.job.results.clone())
            .ok_or_else(|| not_found(job_id))?;
        let reviews = self.reviews.list_for_job(job_id);
        export::export(&results, &reviews, format)
    }
}

fn not_found(job_id: &Uuid) -> AppError {
    AppError::NotFound(format!("Job {} not found", job_id))
}
