//! Artifact resolution for reloads and recovery.
//!
//! The registry stores metadata durably but handles die with the process.
//! An [`ArtifactSource`] turns a (name, version) pair back into a live
//! [`Predictor`] so reload and startup recovery share one resolution path.

use async_trait::async_trait;
use perkon_core::FeatureVector;
use perkon_serving::predictor::{HttpPredictor, Predictor};
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("no artifact for model {name} version {version}")]
    NotFound { name: String, version: String },
    #[error("artifact source unavailable: {0}")]
    Unavailable(String),
}

/// A freshly resolved model handle, with whatever training-side profile
/// the artifact system carries for it. Sources that only know how to
/// reach the model leave `features` and `baseline_metrics` empty.
#[derive(Clone, Debug)]
pub struct LoadedArtifact {
    pub handle: Arc<dyn Predictor>,
    /// Endpoint the handle talks to, when the source is remote.
    pub endpoint: Option<String>,
    pub features: Vec<String>,
    pub baseline_metrics: FeatureVector,
}

impl LoadedArtifact {
    pub fn new(handle: Arc<dyn Predictor>) -> Self {
        Self {
            handle,
            endpoint: None,
            features: Vec::new(),
            baseline_metrics: FeatureVector::default(),
        }
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    pub fn with_baseline_metrics(mut self, metrics: FeatureVector) -> Self {
        self.baseline_metrics = metrics;
        self
    }
}

/// Resolves model versions to live prediction handles.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn load(&self, name: &str, version: &str) -> Result<LoadedArtifact, ArtifactError>;
}

/// Resolves models against a remote serving fleet.
///
/// Each version is assumed to be served at `{base_url}/{name}/{version}`,
/// speaking the [`HttpPredictor`] protocol.
pub struct HttpArtifactSource {
    base_url: String,
    timeout: Duration,
}

impl HttpArtifactSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn load(&self, name: &str, version: &str) -> Result<LoadedArtifact, ArtifactError> {
        let endpoint = format!("{}/{}/{}", self.base_url, name, version);
        let predictor = HttpPredictor::with_timeout(&endpoint, self.timeout)
            .map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        Ok(LoadedArtifact {
            endpoint: Some(endpoint),
            ..LoadedArtifact::new(Arc::new(predictor))
        })
    }
}

/// In-memory source for embedded handles and tests.
#[derive(Default)]
pub struct StaticArtifactSource {
    artifacts: RwLock<FxHashMap<(String, String), LoadedArtifact>>,
}

impl StaticArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, version: &str, handle: Arc<dyn Predictor>) {
        self.insert_artifact(name, version, LoadedArtifact::new(handle));
    }

    pub fn insert_artifact(&self, name: &str, version: &str, artifact: LoadedArtifact) {
        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        artifacts.insert((name.to_string(), version.to_string()), artifact);
    }
}

#[async_trait]
impl ArtifactSource for StaticArtifactSource {
    async fn load(&self, name: &str, version: &str) -> Result<LoadedArtifact, ArtifactError> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        match artifacts.get(&(name.to_string(), version.to_string())) {
            Some(artifact) => Ok(artifact.clone()),
            None => Err(ArtifactError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perkon_serving::predictor::HeuristicPredictor;

    #[tokio::test]
    async fn test_static_source_resolves_inserted_handles() {
        let source = StaticArtifactSource::new();
        source.insert("churn", "1.0.0", Arc::new(HeuristicPredictor::new()));

        let artifact = source.load("churn", "1.0.0").await.unwrap();
        assert_eq!(artifact.handle.kind(), "heuristic");
        assert!(artifact.endpoint.is_none());
        assert!(artifact.features.is_empty());
    }

    #[tokio::test]
    async fn test_static_source_carries_training_profile() {
        let source = StaticArtifactSource::new();
        let baseline: FeatureVector = [("r2_score".to_string(), 0.93)].into_iter().collect();
        source.insert_artifact(
            "churn",
            "1.0.0",
            LoadedArtifact::new(Arc::new(HeuristicPredictor::new()))
                .with_features(vec!["tenure".into(), "spend".into()])
                .with_baseline_metrics(baseline),
        );

        let artifact = source.load("churn", "1.0.0").await.unwrap();
        assert_eq!(artifact.features, vec!["tenure", "spend"]);
        assert_eq!(artifact.baseline_metrics.get("r2_score"), Some(&0.93));
    }

    #[tokio::test]
    async fn test_static_source_misses_are_not_found() {
        let source = StaticArtifactSource::new();
        source.insert("churn", "1.0.0", Arc::new(HeuristicPredictor::new()));

        let err = source.load("churn", "2.0.0").await.unwrap_err();
        assert!(
            matches!(err, ArtifactError::NotFound { ref version, .. } if version == "2.0.0"),
            "expected NotFound for 2.0.0, got {}",
            err
        );
    }

    #[tokio::test]
    async fn test_http_source_builds_versioned_endpoint() {
        let source = HttpArtifactSource::new("http://models.internal/serve/");
        let artifact = source.load("churn", "1.2.0").await.unwrap();
        assert_eq!(
            artifact.endpoint.as_deref(),
            Some("http://models.internal/serve/churn/1.2.0")
        );
        assert_eq!(artifact.handle.kind(), "http");
    }
}
