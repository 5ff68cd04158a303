use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::models::job::{JobId, JobRecord};
use crate::models::label::{align_labels, ErrorKind, Outcome, ResultRecord};
use crate::services::classifier::{Classify, ClassifyError};
use crate::services::queue::{QueueDirectory, QueueError};

/// What one scan of the queue did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub swept: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
}

impl CycleReport {
    /// Nothing was claimed or recovered; the loop should back off.
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && self.reclaimed == 0
    }
}

enum JobOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Remote side of the queue: claims pending jobs, classifies them and
/// publishes results.
pub struct WorkerLoop<C> {
    queue: QueueDirectory,
    classifier: C,
    worker_id: String,
    poll_interval: Duration,
    stability_window: Duration,
    lease_duration: Duration,
    result_retention: Duration,
    concurrency: usize,
    max_attempts: u32,
}

impl<C: Classify> WorkerLoop<C> {
    pub fn new(config: &QueueConfig, classifier: C) -> Self {
        Self {
            queue: QueueDirectory::new(config.queue_root.clone()),
            classifier,
            worker_id: config.worker_id.clone(),
            poll_interval: config.poll_interval(),
            stability_window: config.stability_window(),
            lease_duration: config.lease_duration(),
            result_retention: config.result_retention(),
            concurrency: config.worker_concurrency.max(1),
            max_attempts: config.max_attempts,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue(&self) -> &QueueDirectory {
        &self.queue
    }

    /// Run cycles until `shutdown` is cancelled. Idle or failed cycles sleep
    /// for the poll interval first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            root = %self.queue.root().display(),
            concurrency = self.concurrency,
            "Worker loop started"
        );

        while !shutdown.is_cancelled() {
            let idle = match self.run_cycle().await {
                Ok(report) => {
                    if !report.is_idle() {
                        tracing::debug!(?report, "Worker cycle finished");
                    }
                    report.is_idle()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Worker cycle failed, will retry");
                    true
                }
            };

            if idle {
                tracing::trace!("No jobs available, sleeping");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.poll_interval) => {}
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Worker loop stopped");
    }

    /// One scan: reclaim, sweep, list, claim up to the budget, process.
    ///
    /// Only failures of the shared folder itself are returned; anything that
    /// goes wrong with a single job ends up in that job's result.
    pub async fn run_cycle(&self) -> Result<CycleReport, QueueError> {
        let mut report = CycleReport {
            reclaimed: self.queue.reclaim_stale(self.lease_duration).await?.len(),
            swept: self.queue.sweep_results(self.result_retention).await?,
            ..CycleReport::default()
        };

        let mut claimed = Vec::with_capacity(self.concurrency);
        for candidate in self.queue.list_pending(self.stability_window).await? {
            if claimed.len() >= self.concurrency {
                break;
            }
            match self.queue.claim(&candidate.job_id, &self.worker_id).await {
                Ok(true) => claimed.push(candidate.job_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(job_id = %candidate.job_id, error = %e, "Claim failed");
                    report.errors += 1;
                }
            }
        }
        report.claimed = claimed.len();

        let outcomes = join_all(claimed.iter().map(|job_id| self.process(job_id))).await;
        for (job_id, outcome) in claimed.iter().zip(outcomes) {
            match outcome {
                Ok(JobOutcome::Succeeded) => report.succeeded += 1,
                Ok(JobOutcome::Failed) => report.failed += 1,
                Ok(JobOutcome::Skipped) => {}
                Err(e) => {
                    // Left in processing/; the lease brings it back.
                    tracing::error!(job_id = %job_id, error = %e, "Failed to publish job result");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, job_id: &JobId) -> Result<JobOutcome, QueueError> {
        let parsed = match self.queue.read_claimed(job_id).await {
            Ok(Some(bytes)) => parse_job(job_id, &bytes),
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Claimed job left processing before it was read");
                return Ok(JobOutcome::Skipped);
            }
            Err(QueueError::Oversized { source, .. }) => Err(source.to_string()),
            Err(e) => return Err(e),
        };

        let record = match parsed {
            Ok(record) => record,
            Err(reason) => {
                self.reject(job_id, &reason).await?;
                return Ok(JobOutcome::Failed);
            }
        };

        let result = if record.attempt_count >= self.max_attempts {
            tracing::warn!(
                job_id = %job_id,
                attempt_count = record.attempt_count,
                "Job exceeded its attempt budget"
            );
            ResultRecord::failure(
                job_id.clone(),
                ErrorKind::AttemptsExhausted,
                format!(
                    "job {job_id}: abandoned after {} interrupted attempts",
                    record.attempt_count
                ),
                &self.worker_id,
                record.attempt_count,
            )
        } else {
            self.classify(&record).await
        };

        self.publish(job_id, &result).await?;
        Ok(if result.is_success() {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed
        })
    }

    /// Quarantine a record that cannot be processed and answer it with a
    /// `SchemaError` result.
    async fn reject(&self, job_id: &JobId, reason: &str) -> Result<(), QueueError> {
        tracing::warn!(job_id = %job_id, reason = %reason, "Malformed job record");
        self.queue.quarantine(job_id).await?;
        let result = ResultRecord::failure(
            job_id.clone(),
            ErrorKind::SchemaError,
            format!("job {job_id}: {reason}"),
            &self.worker_id,
            0,
        );
        self.publish(job_id, &result).await
    }

    async fn classify(&self, record: &JobRecord) -> ResultRecord {
        let job_id = &record.job_id;
        tracing::info!(
            job_id = %job_id,
            segments = record.segments.len(),
            attempt_count = record.attempt_count,
            "Processing offload job"
        );

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.classifier.classify(&record.segments))
            .catch_unwind()
            .await;
        let duration = started.elapsed();
        metrics::histogram!("offload_classification_seconds").record(duration.as_secs_f64());

        let labels = match outcome {
            Ok(result) => result
                .and_then(|labels| {
                    align_labels(&record.segments, labels).map_err(ClassifyError::Mismatch)
                })
                .map_err(|e| e.to_string()),
            Err(panic) => Err(format!("classifier panicked: {}", panic_message(panic.as_ref()))),
        };

        match labels {
            Ok(labels) => {
                tracing::info!(
                    job_id = %job_id,
                    duration_ms = duration.as_millis() as u64,
                    "Classification complete"
                );
                ResultRecord::success(job_id.clone(), labels, &self.worker_id, record.attempt_count)
            }
            Err(reason) => {
                tracing::error!(job_id = %job_id, error = %reason, "Classification failed");
                ResultRecord::failure(
                    job_id.clone(),
                    ErrorKind::ClassificationError,
                    format!("job {job_id}: {reason}"),
                    &self.worker_id,
                    record.attempt_count,
                )
            }
        }
    }

    async fn publish(&self, job_id: &JobId, result: &ResultRecord) -> Result<(), QueueError> {
        self.queue.complete(job_id, result).await?;
        metrics::counter!("offload_jobs_completed_total", "outcome" => outcome_label(&result.outcome))
            .increment(1);
        Ok(())
    }
}

fn parse_job(job_id: &JobId, bytes: &[u8]) -> Result<JobRecord, String> {
    let record: JobRecord =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid job record: {e}"))?;
    if record.job_id != *job_id {
        return Err(format!(
            "record names job {} but was queued as {job_id}",
            record.job_id
        ));
    }
    record.check()?;
    Ok(record)
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success { .. } => "success",
        Outcome::Failure { error_kind, .. } => match error_kind {
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::ClassificationError => "classification_error",
            ErrorKind::AttemptsExhausted => "attempts_exhausted",
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
