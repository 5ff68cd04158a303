//! Test helper utilities for driving the queue against a temporary folder

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use offload_queue::models::job::Segment;
use offload_queue::models::label::Label;
use offload_queue::services::classifier::{Classify, ClassifyError, HeuristicClassifier};
use offload_queue::QueueConfig;
use tempfile::TempDir;

/// A shared folder in a temp directory with the queue layout created.
pub struct TestQueue {
    pub dir: TempDir,
    pub config: QueueConfig,
}

impl TestQueue {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = fast_config(dir.path());
        offload_queue::QueueDirectory::new(dir.path())
            .ensure_layout()
            .await
            .expect("layout");
        Self { dir, config }
    }

    /// An existing shared folder that no worker has laid out yet.
    pub fn bare() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = fast_config(dir.path());
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn names_in(&self, location: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root().join(location))
            .expect("read dir")
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

/// Config with intervals short enough for tests.
pub fn fast_config(root: &Path) -> QueueConfig {
    let mut config = QueueConfig::with_root(root);
    config.poll_interval_ms = 20;
    config.stability_window_ms = 10;
    config.result_timeout_secs = 5;
    config
}

/// Heuristic labels, counting every call.
#[derive(Clone, Default)]
pub struct CountingClassifier {
    pub calls: Arc<AtomicUsize>,
}

impl CountingClassifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classify for CountingClassifier {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HeuristicClassifier.classify(segments).await
    }
}

/// Returns labels in reverse segment order.
pub struct ReversingClassifier;

impl Classify for ReversingClassifier {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        let mut labels = HeuristicClassifier.classify(segments).await?;
        labels.reverse();
        Ok(labels)
    }
}

/// Drops the last label.
pub struct ShortClassifier;

impl Classify for ShortClassifier {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        let mut labels = HeuristicClassifier.classify(segments).await?;
        labels.pop();
        Ok(labels)
    }
}

pub struct FailingClassifier;

impl Classify for FailingClassifier {
    async fn classify(&self, _segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        Err(ClassifyError::Backend("model not loaded".to_string()))
    }
}

pub struct PanickingClassifier;

impl Classify for PanickingClassifier {
    async fn classify(&self, _segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        panic!("tensor shape mismatch")
    }
}
