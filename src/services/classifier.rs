use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ClassifierKind, QueueConfig};
use crate::models::job::Segment;
use crate::models::label::Label;

/// The external classification capability.
///
/// Implementations return one label per segment. Ordering is not trusted:
/// the worker re-aligns labels to segments by index.
pub trait Classify: Send + Sync {
    fn classify(
        &self,
        segments: &[Segment],
    ) -> impl Future<Output = Result<Vec<Label>, ClassifyError>> + Send;
}

/// Backend selected once when a worker is built.
pub enum ClassifierBackend {
    Heuristic(HeuristicClassifier),
    Http(HttpClassifier),
}

impl ClassifierBackend {
    pub fn from_config(config: &QueueConfig) -> Result<Self, ClassifyError> {
        match config.classifier_backend {
            ClassifierKind::Heuristic => Ok(Self::Heuristic(HeuristicClassifier)),
            ClassifierKind::Http => {
                let url = config.classifier_url.clone().ok_or_else(|| {
                    ClassifyError::Backend("OFFLOAD_CLASSIFIER_URL is required for the http backend".into())
                })?;
                Ok(Self::Http(HttpClassifier::new(url, config.classifier_token.clone())))
            }
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::Heuristic(_) => ClassifierKind::Heuristic,
            Self::Http(_) => ClassifierKind::Http,
        }
    }
}

impl Classify for ClassifierBackend {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        match self {
            Self::Heuristic(inner) => inner.classify(segments).await,
            Self::Http(inner) => inner.classify(segments).await,
        }
    }
}

/// Punctuation-based labelling that needs no model. Useful as a fallback
/// and for exercising the queue end to end.
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn label_text(text: &str) -> (&'static str, f64) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            ("silence", 1.0)
        } else if trimmed.ends_with('?') {
            ("question", 0.9)
        } else if trimmed.ends_with('!') {
            ("exclamation", 0.8)
        } else if trimmed.split_whitespace().count() <= 2 {
            ("backchannel", 0.6)
        } else {
            ("statement", 0.7)
        }
    }
}

impl Classify for HeuristicClassifier {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        Ok(segments
            .iter()
            .map(|segment| {
                let (label, confidence) = Self::label_text(&segment.text);
                Label {
                    index: segment.index,
                    label: label.to_string(),
                    confidence,
                }
            })
            .collect())
    }
}

/// Client for a remote classification endpoint.
pub struct HttpClassifier {
    http: Client,
    url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    segments: &'a [Segment],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    labels: Vec<Label>,
}

impl HttpClassifier {
    pub fn new(url: String, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            url,
            api_token,
        }
    }
}

impl Classify for HttpClassifier {
    async fn classify(&self, segments: &[Segment]) -> Result<Vec<Label>, ClassifyError> {
        let mut request = self.http.post(&self.url).json(&ClassifyRequest { segments });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let body: ClassifyResponse = response.json().await?;
        Ok(body.labels)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier backend error: {0}")]
    Backend(String),

    /// Labels do not line up one-to-one with the submitted segments.
    #[error("Label mismatch: {0}")]
    Mismatch(String),
}
