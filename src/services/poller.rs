use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::models::job::JobId;
use crate::models::label::ResultRecord;
use crate::services::queue::{QueueDirectory, QueueError};

/// Consumer side of the queue: waits for the result of a submitted job.
pub struct PollingClient {
    queue: QueueDirectory,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl PollingClient {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            queue: QueueDirectory::new(config.queue_root.clone()),
            interval: config.poll_interval(),
            timeout: config.result_timeout(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop waiting at the next sleep boundary once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Wait for a result using the configured interval and timeout.
    pub async fn await_result(&self, job_id: &JobId) -> Result<ResultRecord, PollError> {
        self.await_result_with(job_id, self.interval, self.timeout)
            .await
    }

    /// Check `complete/` every `interval` until a result for `job_id` shows up.
    ///
    /// Gives up with [`PollError::Timeout`] once `timeout` has elapsed, and
    /// never before. The job itself is left alone, so a later call can still
    /// pick up a late result.
    pub async fn await_result_with(
        &self,
        job_id: &JobId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<ResultRecord, PollError> {
        let started = Instant::now();
        loop {
            if let Some(result) = self.queue.read_result(job_id).await? {
                tracing::info!(
                    job_id = %job_id,
                    success = result.is_success(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Received job result"
                );
                return Ok(result);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::warn!(
                    job_id = %job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Timed out waiting for job result"
                );
                return Err(PollError::Timeout {
                    job_id: job_id.clone(),
                    elapsed,
                });
            }

            tracing::trace!(job_id = %job_id, "No result yet, sleeping");
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(PollError::Cancelled { job_id: job_id.clone() });
                }
                _ = sleep(interval.min(timeout - elapsed)) => {}
            }
        }
    }

    /// Remove a consumed result (and any leftover artifact of the job).
    pub async fn acknowledge(&self, job_id: &JobId) -> Result<(), PollError> {
        self.queue.purge(job_id).await?;
        tracing::debug!(job_id = %job_id, "Acknowledged job result");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("No result for job {job_id} after {:.1}s", .elapsed.as_secs_f64())]
    Timeout { job_id: JobId, elapsed: Duration },

    #[error("Stopped waiting for job {job_id}")]
    Cancelled { job_id: JobId },

    #[error(transparent)]
    Queue(#[from] QueueError),
}
