use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::job::{JobId, JobRecord, JobState};
use crate::models::label::ResultRecord;

pub const PENDING_DIR: &str = "pending";
pub const PROCESSING_DIR: &str = "processing";
pub const COMPLETE_DIR: &str = "complete";
pub const QUARANTINE_DIR: &str = "quarantine";

/// Largest record file the queue will read.
pub const MAX_RECORD_SIZE: u64 = 16 * 1024 * 1024;

const JOB_EXT: &str = ".json";
const RESULT_SUFFIX: &str = "_result.json";
const LEASE_EXT: &str = ".lease";
const RECLAIM_MARK: &str = ".json.reclaim-";
const TMP_MARK: &str = ".tmp-";

/// Stability windows an empty pending file is given to receive its content.
const EMPTY_FILE_GRACE_WINDOWS: u32 = 10;

/// Sidecar written next to a claimed job; its timestamp starts the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseMarker {
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// A pending job file that passed the stability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub job_id: JobId,
    pub path: PathBuf,
    pub size: u64,
}

/// A job moved back from `processing/` to `pending/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedJob {
    pub job_id: JobId,
    /// New attempt count, or `None` when the record could not be parsed and
    /// was returned unchanged.
    pub attempt_count: Option<u32>,
}

/// Number of entries per queue location.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueDepth {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub quarantined: usize,
}

type FileStamp = (u64, Option<SystemTime>);

/// Job queue laid out as directories inside a file-synced shared folder.
///
/// Every state change is a single `rename` inside the root, which is the only
/// exclusivity primitive the queue relies on. Records are written to a hidden
/// temporary name first so observers never see a partial file under a final
/// name.
#[derive(Debug, Clone)]
pub struct QueueDirectory {
    root: PathBuf,
}

impl QueueDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.join(PENDING_DIR)
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.root.join(PROCESSING_DIR)
    }

    pub fn complete_dir(&self) -> PathBuf {
        self.root.join(COMPLETE_DIR)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    /// Create the queue locations. The root itself must already exist: a
    /// missing root means the sync mount is absent, and creating it would
    /// hide that.
    pub async fn ensure_layout(&self) -> Result<(), QueueError> {
        self.check_root().await?;
        for dir in [
            self.pending_dir(),
            self.processing_dir(),
            self.complete_dir(),
            self.quarantine_dir(),
        ] {
            fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(())
    }

    /// Check that the shared folder and the two shared locations are visible.
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.check_root().await?;
        for dir in [self.pending_dir(), self.complete_dir()] {
            let meta = fs::metadata(&dir).await.map_err(unreachable(&dir))?;
            if !meta.is_dir() {
                return Err(QueueError::Unreachable {
                    path: dir,
                    source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
                });
            }
        }
        Ok(())
    }

    async fn check_root(&self) -> Result<(), QueueError> {
        let meta = fs::metadata(&self.root)
            .await
            .map_err(unreachable(&self.root))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(QueueError::Unreachable {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            })
        }
    }

    /// Make a new job visible in `pending/`.
    ///
    /// Only the root has to exist; `pending/` is created when the worker side
    /// has not laid the folder out yet. An existing job with the same id is
    /// never replaced.
    pub async fn publish(&self, record: &JobRecord) -> Result<(), QueueError> {
        self.check_root().await?;
        let dir = self.pending_dir();
        fs::create_dir_all(&dir).await.map_err(unreachable(&dir))?;

        let bytes = serde_json::to_vec_pretty(record)?;
        write_new(&dir, &record.job_id.job_file_name(), &bytes).await
    }

    /// Pending jobs whose size and mtime did not change across two scans
    /// `stability_window` apart, oldest first.
    ///
    /// Files still changing are left for a later scan. So are empty files,
    /// until they have stayed empty for several windows; after that they are
    /// handed out like any other job and fail to parse.
    pub async fn list_pending(
        &self,
        stability_window: Duration,
    ) -> Result<Vec<PendingJob>, QueueError> {
        let first = self.snapshot_pending().await?;
        if first.is_empty() {
            return Ok(Vec::new());
        }

        sleep(stability_window).await;
        let second = self.snapshot_pending().await?;

        let dir = self.pending_dir();
        let grace = stability_window * EMPTY_FILE_GRACE_WINDOWS;
        let now = SystemTime::now();
        let mut stable = Vec::new();
        for (name, stamp) in second {
            if first.get(&name) != Some(&stamp) || is_fresh_placeholder(&stamp, grace, now) {
                tracing::debug!(file = %name, "Pending file not yet stable, deferring");
                continue;
            }
            let Some(job_id) = job_id_from_file_name(&name) else {
                continue;
            };
            stable.push(PendingJob {
                job_id,
                path: dir.join(&name),
                size: stamp.0,
            });
        }

        stable.sort_by(|a, b| {
            let a_secs = a.job_id.created_secs().unwrap_or(i64::MAX);
            let b_secs = b.job_id.created_secs().unwrap_or(i64::MAX);
            a_secs.cmp(&b_secs).then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(stable)
    }

    async fn snapshot_pending(&self) -> Result<HashMap<String, FileStamp>, QueueError> {
        let dir = self.pending_dir();
        let mut stamps = HashMap::new();
        for name in list_names(&dir).await? {
            if !is_job_file(&name) {
                continue;
            }
            if job_id_from_file_name(&name).is_none() {
                tracing::warn!(file = %name, "Ignoring pending file with an unusable name");
                continue;
            }
            // Vanished between listing and stat: claimed by someone else.
            let Ok(meta) = fs::metadata(dir.join(&name)).await else {
                continue;
            };
            stamps.insert(name, (meta.len(), meta.modified().ok()));
        }
        Ok(stamps)
    }

    /// Take exclusive ownership of a pending job.
    ///
    /// Returns `false` when the job is no longer in `pending/`, which means
    /// another worker won the rename.
    pub async fn claim(&self, job_id: &JobId, worker_id: &str) -> Result<bool, QueueError> {
        let from = self.pending_dir().join(job_id.job_file_name());
        let to = self.processing_dir().join(job_id.job_file_name());
        match fs::rename(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(job_id = %job_id, "Job already claimed elsewhere");
                return Ok(false);
            }
            Err(e) => return Err(QueueError::Io { path: from, source: e }),
        }

        let marker = LeaseMarker {
            worker_id: worker_id.to_string(),
            claimed_at: Utc::now(),
        };
        if let Err(e) = self.write_lease(job_id, &marker).await {
            // The reclaim scan starts a lease for unmarked jobs.
            tracing::warn!(job_id = %job_id, error = %e, "Failed to write lease marker");
        }

        tracing::debug!(job_id = %job_id, worker_id, "Claimed job");
        Ok(true)
    }

    /// Raw bytes of a claimed job, or `None` if it has left `processing/`.
    ///
    /// A record over `MAX_RECORD_SIZE` is reported as `Oversized` so the
    /// caller can reject it like any other malformed record.
    pub async fn read_claimed(&self, job_id: &JobId) -> Result<Option<Vec<u8>>, QueueError> {
        let path = self.processing_dir().join(job_id.job_file_name());
        match read_bounded(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Err(QueueError::Oversized { path, source: e })
            }
            Err(e) => Err(QueueError::Io { path, source: e }),
        }
    }

    /// Return jobs whose lease expired to `pending/` with their attempt count
    /// incremented.
    ///
    /// Also starts a lease for claimed jobs that have no marker, drops
    /// orphaned markers, and finishes reclaims interrupted by a crash.
    ///
    /// Only a failure to list `processing/` is returned. Trouble with a single
    /// entry is logged and the entry is retried on the next scan.
    pub async fn reclaim_stale(
        &self,
        lease_duration: Duration,
    ) -> Result<Vec<ReclaimedJob>, QueueError> {
        let dir = self.processing_dir();
        let names = list_names(&dir).await?;
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for name in &names {
            match self.reclaim_entry(name, &present, now, lease_duration).await {
                Ok(Some(job)) => reclaimed.push(job),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Failed to recover processing entry");
                }
            }
        }

        Ok(reclaimed)
    }

    async fn reclaim_entry(
        &self,
        name: &str,
        present: &HashSet<&str>,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<ReclaimedJob>, QueueError> {
        let dir = self.processing_dir();

        if is_job_file(name) {
            let Some(job_id) = job_id_from_file_name(name) else {
                return Ok(None);
            };
            match self.read_lease(&job_id).await {
                Some(marker) if age(now, marker.claimed_at) > lease_duration => {
                    tracing::warn!(
                        job_id = %job_id,
                        worker_id = %marker.worker_id,
                        claimed_at = %marker.claimed_at,
                        "Lease expired"
                    );
                    self.reclaim_one(&job_id).await
                }
                Some(_) => Ok(None),
                None => {
                    let marker = LeaseMarker {
                        worker_id: "unknown".to_string(),
                        claimed_at: now,
                    };
                    self.write_lease(&job_id, &marker).await?;
                    Ok(None)
                }
            }
        } else if let Some(stem) = name.strip_suffix(LEASE_EXT) {
            let job_file = format!("{stem}{JOB_EXT}");
            if present.contains(job_file.as_str()) {
                return Ok(None);
            }
            let Some(job_id) = JobId::parse(stem) else {
                return Ok(None);
            };
            let expired = self
                .read_lease(&job_id)
                .await
                .map_or(true, |m| age(now, m.claimed_at) > lease_duration);
            if expired && remove_if_exists(&dir.join(name)).await? {
                tracing::debug!(job_id = %job_id, "Removed orphaned lease marker");
            }
            Ok(None)
        } else if let Some((job_id, staged_secs)) = parse_reclaim_name(name) {
            let staged_at = DateTime::from_timestamp(staged_secs, 0).unwrap_or(now);
            if age(now, staged_at) <= lease_duration {
                return Ok(None);
            }
            tracing::warn!(job_id = %job_id, "Recovering interrupted reclaim");
            self.restage_and_reclaim(&job_id, &dir.join(name)).await
        } else {
            Ok(None)
        }
    }

    async fn reclaim_one(&self, job_id: &JobId) -> Result<Option<ReclaimedJob>, QueueError> {
        let source = self.processing_dir().join(job_id.job_file_name());
        self.restage_and_reclaim(job_id, &source).await
    }

    async fn restage_and_reclaim(
        &self,
        job_id: &JobId,
        source: &Path,
    ) -> Result<Option<ReclaimedJob>, QueueError> {
        let staging = self.processing_dir().join(format!(
            ".{}{}{}-{}",
            job_id,
            RECLAIM_MARK,
            Utc::now().timestamp(),
            Uuid::new_v4().simple()
        ));
        match fs::rename(source, &staging).await {
            Ok(()) => {}
            // Completed or reclaimed by someone else in the meantime.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(QueueError::Io {
                    path: source.to_path_buf(),
                    source: e,
                })
            }
        }

        let updated = match read_bounded(&staging).await {
            Ok(bytes) => match serde_json::from_slice::<JobRecord>(&bytes) {
                Ok(mut record) => {
                    record.attempt_count += 1;
                    Some((serde_json::to_vec_pretty(&record)?, record.attempt_count))
                }
                Err(_) => None,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => None,
            Err(e) => return Err(QueueError::Io { path: staging, source: e }),
        };

        // Drop the old lease before the job is claimable again so a new
        // owner's marker is never removed.
        remove_if_exists(&self.processing_dir().join(job_id.lease_file_name())).await?;
        let attempt_count = match updated {
            Some((bytes, attempt_count)) => {
                write_atomic(&self.pending_dir(), &job_id.job_file_name(), &bytes).await?;
                remove_if_exists(&staging).await?;
                Some(attempt_count)
            }
            // Unparsable or oversized: returned as is, the next claimer
            // quarantines it.
            None => {
                let target = self.pending_dir().join(job_id.job_file_name());
                fs::rename(&staging, &target)
                    .await
                    .map_err(io_err(&staging))?;
                None
            }
        };

        metrics::counter!("offload_jobs_reclaimed_total").increment(1);
        tracing::warn!(job_id = %job_id, attempt_count = ?attempt_count, "Reclaimed stale job");

        Ok(Some(ReclaimedJob {
            job_id: job_id.clone(),
            attempt_count,
        }))
    }

    async fn read_lease(&self, job_id: &JobId) -> Option<LeaseMarker> {
        let path = self.processing_dir().join(job_id.lease_file_name());
        let bytes = fs::read(&path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_lease(&self, job_id: &JobId, marker: &LeaseMarker) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(marker)?;
        write_atomic(&self.processing_dir(), &job_id.lease_file_name(), &bytes).await
    }

    /// Publish the result of a claimed job and drop it from `processing/`.
    ///
    /// An existing result for the same job is replaced.
    pub async fn complete(&self, job_id: &JobId, result: &ResultRecord) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec_pretty(result)?;
        write_atomic(&self.complete_dir(), &job_id.result_file_name(), &bytes).await?;

        let processing = self.processing_dir();
        remove_if_exists(&processing.join(job_id.job_file_name())).await?;
        remove_if_exists(&processing.join(job_id.lease_file_name())).await?;

        tracing::info!(
            job_id = %job_id,
            success = result.is_success(),
            "Published job result"
        );
        Ok(())
    }

    /// Move a claimed job that cannot be processed into `quarantine/`.
    pub async fn quarantine(&self, job_id: &JobId) -> Result<bool, QueueError> {
        let dir = self.quarantine_dir();
        let source = self.processing_dir().join(job_id.job_file_name());
        let mut target = dir.join(job_id.job_file_name());
        if fs::try_exists(&target).await.map_err(io_err(&dir))? {
            let nanos = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            target = dir.join(format!("{job_id}-{nanos}{JOB_EXT}"));
        }

        let moved = match fs::rename(&source, &target).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(QueueError::Io { path: source, source: e }),
        };
        remove_if_exists(&self.processing_dir().join(job_id.lease_file_name())).await?;

        if moved {
            metrics::counter!("offload_jobs_quarantined_total").increment(1);
            tracing::warn!(job_id = %job_id, path = %target.display(), "Quarantined job record");
        }
        Ok(moved)
    }

    /// Read the result for a job if one is visible.
    ///
    /// Falls back to a normalized directory scan when the exact name is not
    /// found, since the two sides may see the folder with different case or
    /// separator conventions. A result that does not parse yet is treated as
    /// not visible: the sync client may still be writing it.
    pub async fn read_result(&self, job_id: &JobId) -> Result<Option<ResultRecord>, QueueError> {
        let dir = self.complete_dir();
        let expected = job_id.result_file_name();
        let mut path = dir.join(&expected);

        let bytes = match read_bounded(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let names = match list_names(&dir).await {
                    Ok(names) => names,
                    // `complete/` not created or not synced yet.
                    Err(QueueError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                        self.check_root().await?;
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };
                let wanted = normalize_name(&expected);
                let found = names.into_iter().find(|name| normalize_name(name) == wanted);
                let Some(name) = found else {
                    return Ok(None);
                };
                path = dir.join(name);
                match read_bounded(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(QueueError::Io { path, source: e }),
                }
            }
            Err(e) => return Err(QueueError::Io { path, source: e }),
        };

        let record: ResultRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Result not readable yet");
                return Ok(None);
            }
        };

        if normalize_name(record.job_id.as_str()) != normalize_name(job_id.as_str()) {
            tracing::warn!(
                job_id = %job_id,
                found = %record.job_id,
                path = %path.display(),
                "Result file names a different job"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Delete every artifact of a job. Missing files are not an error.
    pub async fn purge(&self, job_id: &JobId) -> Result<(), QueueError> {
        let processing = self.processing_dir();
        for path in [
            self.pending_dir().join(job_id.job_file_name()),
            processing.join(job_id.job_file_name()),
            processing.join(job_id.lease_file_name()),
            self.complete_dir().join(job_id.result_file_name()),
        ] {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    /// Delete results older than `retention`. Returns how many were removed.
    pub async fn sweep_results(&self, retention: Duration) -> Result<usize, QueueError> {
        let dir = self.complete_dir();
        let now = SystemTime::now();
        let mut removed = 0;
        for name in list_names(&dir).await? {
            if !name.ends_with(RESULT_SUFFIX) || name.starts_with('.') {
                continue;
            }
            let path = dir.join(&name);
            let Ok(modified) = fs::metadata(&path).await.and_then(|m| m.modified()) else {
                continue;
            };
            let expired = now
                .duration_since(modified)
                .map(|age| age > retention)
                .unwrap_or(false);
            if expired && remove_if_exists(&path).await? {
                tracing::debug!(file = %name, "Swept expired result");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Where a job currently is, with its result when it has one.
    pub async fn locate(
        &self,
        job_id: &JobId,
    ) -> Result<(JobState, Option<ResultRecord>), QueueError> {
        if let Some(result) = self.read_result(job_id).await? {
            return Ok((result.state(), Some(result)));
        }

        let name = job_id.job_file_name();
        for (dir, state) in [
            (self.processing_dir(), JobState::Processing),
            (self.pending_dir(), JobState::Pending),
            (self.quarantine_dir(), JobState::Quarantined),
        ] {
            if fs::try_exists(dir.join(&name)).await.map_err(io_err(&dir))? {
                return Ok((state, None));
            }
        }
        Ok((JobState::Unknown, None))
    }

    pub async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let count_jobs = |names: Vec<String>| names.iter().filter(|n| is_job_file(n)).count();

        let depth = QueueDepth {
            pending: count_jobs(list_names(&self.pending_dir()).await?),
            processing: count_jobs(list_names(&self.processing_dir()).await?),
            complete: list_names(&self.complete_dir())
                .await?
                .iter()
                .filter(|n| n.ends_with(RESULT_SUFFIX) && !n.starts_with('.'))
                .count(),
            quarantined: count_jobs(list_names(&self.quarantine_dir()).await?),
        };

        metrics::gauge!("offload_queue_depth", "location" => PENDING_DIR).set(depth.pending as f64);
        metrics::gauge!("offload_queue_depth", "location" => PROCESSING_DIR)
            .set(depth.processing as f64);
        metrics::gauge!("offload_queue_depth", "location" => COMPLETE_DIR).set(depth.complete as f64);
        metrics::gauge!("offload_queue_depth", "location" => QUARANTINE_DIR)
            .set(depth.quarantined as f64);
        Ok(depth)
    }
}

/// Write `bytes` under a hidden temporary name in `dir`, then rename it to
/// `file_name`.
async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(), QueueError> {
    let tmp = write_temp(dir, file_name, bytes).await?;
    let target = dir.join(file_name);

    if let Err(e) = fs::rename(&tmp, &target).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(QueueError::Io {
            path: target,
            source: e,
        });
    }
    Ok(())
}

/// Write and sync `bytes` to a hidden temporary file next to `file_name`.
async fn write_temp(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, QueueError> {
    let tmp = dir.join(format!(".{file_name}{TMP_MARK}{}", Uuid::new_v4().simple()));
    let written: io::Result<()> = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    match written {
        Ok(()) => Ok(tmp),
        Err(e) => {
            let _ = fs::remove_file(&tmp).await;
            Err(QueueError::Io { path: tmp, source: e })
        }
    }
}

/// Like `write_atomic`, but fails with `AlreadyExists` instead of replacing
/// an existing `file_name`.
///
/// The final name is created with `hard_link`, which refuses to clobber.
/// Filesystems without hard links fall back to a checked rename.
async fn write_new(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(), QueueError> {
    let tmp = write_temp(dir, file_name, bytes).await?;
    let target = dir.join(file_name);

    let linked = fs::hard_link(&tmp, &target).await;
    match linked {
        Ok(()) => {
            remove_if_exists(&tmp).await?;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&tmp).await;
            Err(QueueError::AlreadyExists { path: target })
        }
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "hard_link unavailable, using rename");
            if fs::try_exists(&target).await.map_err(io_err(&target))? {
                let _ = fs::remove_file(&tmp).await;
                return Err(QueueError::AlreadyExists { path: target });
            }
            if let Err(e) = fs::rename(&tmp, &target).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(QueueError::Io {
                    path: target,
                    source: e,
                });
            }
            Ok(())
        }
    }
}

async fn read_bounded(path: &Path) -> io::Result<Vec<u8>> {
    let len = fs::metadata(path).await?.len();
    if len > MAX_RECORD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record size {len} exceeds max {MAX_RECORD_SIZE}"),
        ));
    }
    fs::read(path).await
}

async fn remove_if_exists(path: &Path) -> Result<bool, QueueError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(QueueError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn list_names(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut entries = fs::read_dir(dir).await.map_err(io_err(dir))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// An empty file modified within `grace` is most likely a sync placeholder.
fn is_fresh_placeholder(stamp: &FileStamp, grace: Duration, now: SystemTime) -> bool {
    let (len, modified) = stamp;
    *len == 0
        && modified.is_some_and(|m| now.duration_since(m).map_or(true, |age| age < grace))
}

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

fn is_job_file(name: &str) -> bool {
    name.ends_with(JOB_EXT) && !name.starts_with('.') && !name.ends_with(RESULT_SUFFIX)
}

fn job_id_from_file_name(name: &str) -> Option<JobId> {
    name.strip_suffix(JOB_EXT).and_then(JobId::parse)
}

/// Split `.<job_id>.json.reclaim-<secs>-<hex>` into the job id and the
/// second the reclaim started.
fn parse_reclaim_name(name: &str) -> Option<(JobId, i64)> {
    let rest = name.strip_prefix('.')?;
    let (stem, tail) = rest.split_once(RECLAIM_MARK)?;
    let (secs, _) = tail.split_once('-')?;
    Some((JobId::parse(stem)?, secs.parse().ok()?))
}

/// Reduce a file name or path to a comparable key: last component only,
/// forward slashes, lower case.
pub fn normalize_name(name: &str) -> String {
    let unified = name.replace('\\', "/");
    unified
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn unreachable(path: &Path) -> impl FnOnce(io::Error) -> QueueError + '_ {
    move |source| QueueError::Unreachable {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Shared folder {} is unreachable: {source}", .path.display())]
    Unreachable { path: PathBuf, source: io::Error },

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Record {} already exists", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Record {} is too large: {source}", .path.display())]
    Oversized { path: PathBuf, source: io::Error },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
