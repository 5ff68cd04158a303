use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::{JobId, JobState, Segment};

/// Classification of a single segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub index: u32,
    pub label: String,
    pub confidence: f64,
}

/// Category of a per-job failure reported back to the submitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaError,
    ClassificationError,
    AttemptsExhausted,
}

/// Outcome carried by a result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { labels: Vec<Label> },
    Failure { error_kind: ErrorKind, message: String },
}

/// Answer published to `complete/` for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub outcome: Outcome,
    pub processed_at: DateTime<Utc>,
    pub worker_id: String,
    #[serde(default)]
    pub attempt_count: u32,
}

impl ResultRecord {
    pub fn success(job_id: JobId, labels: Vec<Label>, worker_id: &str, attempt_count: u32) -> Self {
        Self {
            job_id,
            outcome: Outcome::Success { labels },
            processed_at: Utc::now(),
            worker_id: worker_id.to_string(),
            attempt_count,
        }
    }

    pub fn failure(
        job_id: JobId,
        error_kind: ErrorKind,
        message: impl Into<String>,
        worker_id: &str,
        attempt_count: u32,
    ) -> Self {
        Self {
            job_id,
            outcome: Outcome::Failure {
                error_kind,
                message: message.into(),
            },
            processed_at: Utc::now(),
            worker_id: worker_id.to_string(),
            attempt_count,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn labels(&self) -> Option<&[Label]> {
        match &self.outcome {
            Outcome::Success { labels } => Some(labels),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn state(&self) -> JobState {
        if self.is_success() {
            JobState::Completed
        } else {
            JobState::Failed
        }
    }
}

/// Put classifier labels into segment order.
///
/// Every segment index must be labelled exactly once and no other index may
/// appear; anything else is reported as an error rather than a partial result.
pub fn align_labels(segments: &[Segment], labels: Vec<Label>) -> Result<Vec<Label>, String> {
    if labels.len() != segments.len() {
        return Err(format!(
            "classifier returned {} labels for {} segments",
            labels.len(),
            segments.len()
        ));
    }

    let mut by_index: HashMap<u32, Label> = HashMap::with_capacity(labels.len());
    for label in labels {
        let index = label.index;
        if by_index.insert(index, label).is_some() {
            return Err(format!("classifier labelled segment {index} twice"));
        }
    }

    segments
        .iter()
        .map(|segment| {
            by_index
                .remove(&segment.index)
                .ok_or_else(|| format!("classifier returned no label for segment {}", segment.index))
        })
        .collect()
}
