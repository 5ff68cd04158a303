use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an offloaded job, `job_<unix_seconds>_<random_hex>`.
///
/// Ids sort lexicographically by creation second. The id is also the file
/// stem of the job in every queue location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id stamped with the current time.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(now: DateTime<Utc>) -> Self {
        Self(format!("job_{}_{}", now.timestamp(), Uuid::new_v4().simple()))
    }

    /// Parse an id received from outside the queue (file stems, URLs).
    ///
    /// Only ASCII alphanumerics, `_` and `-` are accepted so an id can never
    /// escape its queue directory.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation second embedded in the id, if it follows the standard layout.
    pub fn created_secs(&self) -> Option<i64> {
        let rest = self.0.strip_prefix("job_")?;
        let (secs, _) = rest.split_once('_')?;
        secs.parse().ok()
    }

    /// File name of the job record in `pending/` and `processing/`.
    pub fn job_file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// File name of the result record in `complete/`.
    pub fn result_file_name(&self) -> String {
        format!("{}_result.json", self.0)
    }

    /// File name of the lease marker kept beside a claimed job.
    pub fn lease_file_name(&self) -> String {
        format!("{}.lease", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dialogue segment handed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Segment {
    #[garde(skip)]
    pub index: u32,

    #[garde(length(max = 200))]
    pub speaker: String,

    #[garde(length(max = 100_000))]
    pub text: String,

    #[garde(range(min = 0.0))]
    pub start_time: f64,

    #[garde(range(min = 0.0))]
    pub end_time: f64,
}

/// A unit of offloaded work as stored in `pending/` and `processing/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobRecord {
    #[garde(skip)]
    pub job_id: JobId,

    #[garde(skip)]
    pub created_at: DateTime<Utc>,

    #[garde(dive)]
    pub segments: Vec<Segment>,

    #[garde(skip)]
    #[serde(default)]
    pub attempt_count: u32,
}

impl JobRecord {
    pub fn new(segments: Vec<Segment>) -> Self {
        let created_at = Utc::now();
        Self {
            job_id: JobId::generate_at(created_at),
            created_at,
            segments,
            attempt_count: 0,
        }
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|report| report.to_string())?;

        let mut seen = HashSet::with_capacity(self.segments.len());
        for segment in &self.segments {
            if !seen.insert(segment.index) {
                return Err(format!("duplicate segment index {}", segment.index));
            }
            if segment.end_time < segment.start_time {
                return Err(format!(
                    "segment {} ends at {} before it starts at {}",
                    segment.index, segment.end_time, segment.start_time
                ));
            }
        }
        Ok(())
    }
}

/// Where a job currently sits in the shared folder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Quarantined,
    Unknown,
}
