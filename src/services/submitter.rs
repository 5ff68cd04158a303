use std::path::PathBuf;

use crate::config::QueueConfig;
use crate::models::job::{JobId, JobRecord, Segment};
use crate::services::queue::{QueueDirectory, QueueError};

/// Producer side of the queue: turns segments into a pending job.
pub struct Submitter {
    queue: QueueDirectory,
}

impl Submitter {
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_queue(QueueDirectory::new(config.queue_root.clone()))
    }

    pub fn with_queue(queue: QueueDirectory) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &QueueDirectory {
        &self.queue
    }

    /// Queue segments for classification and return the new job's id.
    ///
    /// Returns as soon as the job is durably visible in `pending/`; whether a
    /// worker is running is irrelevant here. Errors are not retried.
    pub async fn submit(&self, segments: Vec<Segment>) -> Result<JobId, SubmissionError> {
        let record = JobRecord::new(segments);
        record.check().map_err(SubmissionError::Invalid)?;

        match self.queue.publish(&record).await {
            Ok(()) => {}
            Err(QueueError::AlreadyExists { .. }) => {
                return Err(SubmissionError::Collision(record.job_id));
            }
            Err(e @ (QueueError::Serialize(_) | QueueError::Oversized { .. })) => {
                return Err(SubmissionError::Invalid(e.to_string()));
            }
            Err(QueueError::Unreachable { path, source }) | Err(QueueError::Io { path, source }) => {
                tracing::error!(
                    job_id = %record.job_id,
                    path = %path.display(),
                    error = %source,
                    "Shared folder unreachable, job not submitted"
                );
                return Err(SubmissionError::Unreachable { path, source });
            }
        }

        metrics::counter!("offload_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %record.job_id,
            segments = record.segments.len(),
            "Submitted offload job"
        );
        Ok(record.job_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Shared folder {} is unreachable: {source}", .path.display())]
    Unreachable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Job id {0} already exists in the queue")]
    Collision(JobId),

    #[error("Job rejected: {0}")]
    Invalid(String),
}
