//! Model metadata, versioning, and deployed-instance types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::FeatureVector;

/// Unique identifier for a deployed model instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Generates a fresh random instance id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time health tag attached to registry listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealthTag {
    Healthy,
    Unhealthy,
    Stale,
    Unknown,
}

impl std::fmt::Display for ModelHealthTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Stale => write!(f, "stale"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Canonical metadata record for a registered model.
///
/// Exactly one active record exists per model name; re-registering a new
/// version supersedes the old one and archives its version string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub model_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub performance_metrics: FeatureVector,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prediction_count: u64,
    #[serde(default)]
    pub previous_versions: Vec<String>,
}

impl ModelMetadata {
    pub fn new(name: &str, version: &str, model_type: &str, features: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            model_type: model_type.to_string(),
            created_at: Utc::now(),
            performance_metrics: FeatureVector::default(),
            features,
            last_used: None,
            prediction_count: 0,
            previous_versions: Vec::new(),
        }
    }

    /// Records a serving access: bumps the prediction counter and refreshes
    /// the last-used timestamp.
    pub fn touch(&mut self) {
        self.last_used = Some(Utc::now());
        self.prediction_count += 1;
    }

    /// Merges freshly computed metrics into the stored ones. Existing keys
    /// are overwritten, unknown keys are added.
    pub fn merge_metrics(&mut self, metrics: &FeatureVector) {
        for (name, value) in metrics {
            self.performance_metrics.insert(name.clone(), *value);
        }
    }

    /// A model is stale when it has not served a prediction within the given
    /// window. Models that never served fall back to their creation time.
    pub fn is_stale(&self, window: Duration) -> bool {
        let reference = self.last_used.unwrap_or(self.created_at);
        Utc::now() - reference > window
    }
}

/// Running counters for a single deployed instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceStats {
    pub requests: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
}

impl InstanceStats {
    pub fn record(&mut self, latency_ms: f64, success: bool) {
        self.requests += 1;
        self.total_latency_ms += latency_ms;
        if !success {
            self.errors += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.requests as f64
        }
    }
}

/// A deployed serving instance of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInstance {
    pub id: InstanceId,
    /// Endpoint the instance serves on, e.g. `http://10.0.3.17:8501`.
    pub endpoint: String,
    pub weight: f64,
    pub active: bool,
    #[serde(default)]
    pub stats: InstanceStats,
}

impl ModelInstance {
    pub fn new(id: InstanceId, endpoint: &str, weight: f64) -> Self {
        Self {
            id,
            endpoint: endpoint.to_string(),
            weight,
            active: true,
            stats: InstanceStats::default(),
        }
    }
}

/// Serializable instance view for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub endpoint: String,
    pub weight: f64,
    pub active: bool,
    pub requests: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

impl From<&ModelInstance> for InstanceInfo {
    fn from(instance: &ModelInstance) -> Self {
        Self {
            id: instance.id.0.clone(),
            endpoint: instance.endpoint.clone(),
            weight: instance.weight,
            active: instance.active,
            requests: instance.stats.requests,
            errors: instance.stats.errors,
            error_rate: instance.stats.error_rate(),
            avg_latency_ms: instance.stats.avg_latency_ms(),
        }
    }
}
