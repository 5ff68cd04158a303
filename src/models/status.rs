use serde::Serialize;

use crate::models::job::{JobId, JobState};
use crate::models::label::ResultRecord;

/// Response for querying where a job currently is.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobState,
    pub result: Option<ResultRecord>,
}
