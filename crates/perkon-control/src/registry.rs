//! Model registry: the control plane's source of truth.
//!
//! Each model name maps to exactly one active record holding its metadata
//! and, when loaded, a live prediction handle. Metadata survives restarts
//! through snapshots; handles are re-resolved from the artifact source on
//! recovery.

use crate::artifact::{ArtifactError, ArtifactSource};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use perkon_core::config::{hard_violations, RegistryConfig};
use perkon_core::model::{ModelHealthTag, ModelMetadata};
use perkon_core::FeatureVector;
use perkon_monitor::monitor::MonitorTarget;
use perkon_serving::predictor::Predictor;
use perkon_serving::store::{SnapshotManager, StoreError};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

const MODEL_PREFIX: &str = "model:";

fn model_key(name: &str) -> String {
    format!("{}{}", MODEL_PREFIX, name)
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registration rejected for {name}: {}", violations.join("; "))]
    RegistrationRejected { name: String, violations: Vec<String> },
    #[error("model {0} has no loaded handle")]
    ModelUnavailable(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ModelRecord {
    metadata: ModelMetadata,
    /// Metrics as they stood at registration, the reference point for
    /// degradation checks.
    baseline_metrics: FeatureVector,
    handle: Option<Arc<dyn Predictor>>,
}

/// Snapshot payload per model. The handle is process-local and rebuilt
/// from the artifact source instead.
#[derive(Serialize, Deserialize)]
struct PersistedModel {
    metadata: ModelMetadata,
    #[serde(default)]
    baseline_metrics: FeatureVector,
}

/// Listing row for one registered model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: String,
    pub model_type: String,
    pub loaded: bool,
    pub health: ModelHealthTag,
    pub prediction_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct ModelRegistry {
    config: RegistryConfig,
    models: RwLock<FxHashMap<String, ModelRecord>>,
    snapshots: SnapshotManager,
    artifacts: Arc<dyn ArtifactSource>,
}

impl ModelRegistry {
    pub fn new(
        config: RegistryConfig,
        snapshots: SnapshotManager,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            config,
            models: RwLock::new(FxHashMap::default()),
            snapshots,
            artifacts,
        }
    }

    /// Registers a model, gating on the hard metric thresholds.
    ///
    /// Re-registering the same version swaps the handle and refreshes the
    /// metadata while keeping the serving counters. A new version supersedes
    /// the record wholesale and archives the old version string.
    pub fn register(
        &self,
        mut metadata: ModelMetadata,
        handle: Arc<dyn Predictor>,
    ) -> Result<ModelMetadata, RegistryError> {
        let violations = hard_violations(
            &self.config.registration_thresholds,
            &metadata.performance_metrics,
        );
        if !violations.is_empty() {
            return Err(RegistryError::RegistrationRejected {
                name: metadata.name.clone(),
                violations,
            });
        }

        let baseline = metadata.performance_metrics.clone();
        let persisted = {
            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            match models.get_mut(&metadata.name) {
                Some(record) if record.metadata.version == metadata.version => {
                    metadata.created_at = record.metadata.created_at;
                    metadata.last_used = record.metadata.last_used;
                    metadata.prediction_count = record.metadata.prediction_count;
                    metadata.previous_versions = record.metadata.previous_versions.clone();
                    info!(
                        "Re-registered model {} version {}",
                        metadata.name, metadata.version
                    );
                    record.metadata = metadata.clone();
                    record.baseline_metrics = baseline.clone();
                    record.handle = Some(handle);
                }
                Some(record) => {
                    metadata.previous_versions = record.metadata.previous_versions.clone();
                    metadata.previous_versions.push(record.metadata.version.clone());
                    info!(
                        "Model {} version {} supersedes {}",
                        metadata.name, metadata.version, record.metadata.version
                    );
                    record.metadata = metadata.clone();
                    record.baseline_metrics = baseline.clone();
                    record.handle = Some(handle);
                }
                None => {
                    info!(
                        "Registered model {} version {} ({})",
                        metadata.name, metadata.version, metadata.model_type
                    );
                    models.insert(
                        metadata.name.clone(),
                        ModelRecord {
                            metadata: metadata.clone(),
                            baseline_metrics: baseline.clone(),
                            handle: Some(handle),
                        },
                    );
                }
            }
            PersistedModel {
                metadata: metadata.clone(),
                baseline_metrics: baseline,
            }
        };

        self.snapshots
            .save(&model_key(&metadata.name), &persisted, None)?;
        Ok(metadata)
    }

    /// Registers a model whose handle is resolved through the artifact
    /// source instead of arriving with the request.
    pub async fn register_from_source(
        &self,
        mut metadata: ModelMetadata,
    ) -> Result<ModelMetadata, RegistryError> {
        let artifact = self
            .artifacts
            .load(&metadata.name, &metadata.version)
            .await?;
        // The artifact system's training profile fills whatever the caller
        // left blank.
        if metadata.features.is_empty() {
            metadata.features = artifact.features;
        }
        if metadata.performance_metrics.is_empty() {
            metadata.performance_metrics = artifact.baseline_metrics;
        }
        self.register(metadata, artifact.handle)
    }

    /// Returns the live handle for serving and records the access.
    ///
    /// The touched counters stay in memory until the next persisting
    /// mutation or staleness sweep writes them out.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Predictor>, RegistryError> {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        let record = models
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
        let handle = record
            .handle
            .clone()
            .ok_or_else(|| RegistryError::ModelUnavailable(name.to_string()))?;
        record.metadata.touch();
        Ok(handle)
    }

    pub fn get_metadata(&self, name: &str) -> Option<ModelMetadata> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(name).map(|r| r.metadata.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.contains_key(name)
    }

    pub fn is_loaded(&self, name: &str) -> Option<bool> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(name).map(|r| r.handle.is_some())
    }

    /// Lists every model with a point-in-time health tag, sorted by name.
    pub async fn list(&self) -> Vec<ModelSummary> {
        let records: Vec<(ModelMetadata, Option<Arc<dyn Predictor>>)> = {
            let models = self.models.read().unwrap_or_else(|e| e.into_inner());
            models
                .values()
                .map(|r| (r.metadata.clone(), r.handle.clone()))
                .collect()
        };

        let mut summaries = Vec::with_capacity(records.len());
        for (metadata, handle) in records {
            let health = self.tag_for(&metadata, handle.as_ref()).await;
            summaries.push(ModelSummary {
                name: metadata.name,
                version: metadata.version,
                model_type: metadata.model_type,
                loaded: handle.is_some(),
                health,
                prediction_count: metadata.prediction_count,
                last_used: metadata.last_used,
                created_at: metadata.created_at,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub async fn health_tag(&self, name: &str) -> Result<ModelHealthTag, RegistryError> {
        let (metadata, handle) = {
            let models = self.models.read().unwrap_or_else(|e| e.into_inner());
            let record = models
                .get(name)
                .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
            (record.metadata.clone(), record.handle.clone())
        };
        Ok(self.tag_for(&metadata, handle.as_ref()).await)
    }

    /// Tags one model: unloaded is unknown, idle past the staleness window
    /// is stale, then a dummy-input self test separates healthy from
    /// unhealthy. Models without a declared schema skip the probe.
    async fn tag_for(
        &self,
        metadata: &ModelMetadata,
        handle: Option<&Arc<dyn Predictor>>,
    ) -> ModelHealthTag {
        let handle = match handle {
            Some(handle) => handle,
            None => return ModelHealthTag::Unknown,
        };
        if metadata.is_stale(ChronoDuration::days(self.config.staleness_days)) {
            return ModelHealthTag::Stale;
        }
        if metadata.features.is_empty() {
            return ModelHealthTag::Healthy;
        }

        let probe: FeatureVector = metadata
            .features
            .iter()
            .map(|f| (f.clone(), 0.0))
            .collect();
        let deadline = Duration::from_secs(self.config.self_test_timeout_secs);
        match tokio::time::timeout(deadline, handle.predict(&[probe])).await {
            Ok(Ok(_)) => ModelHealthTag::Healthy,
            Ok(Err(e)) => {
                warn!("Self test failed for {}: {}", metadata.name, e);
                ModelHealthTag::Unhealthy
            }
            Err(_) => {
                warn!(
                    "Self test for {} timed out after {}s",
                    metadata.name, self.config.self_test_timeout_secs
                );
                ModelHealthTag::Unhealthy
            }
        }
    }

    /// Drops the live handle but keeps the metadata registered.
    pub fn unload(&self, name: &str) -> Result<(), RegistryError> {
        let persisted = {
            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            let record = models
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
            record.handle = None;
            PersistedModel {
                metadata: record.metadata.clone(),
                baseline_metrics: record.baseline_metrics.clone(),
            }
        };
        info!("Unloaded model {}", name);
        self.snapshots.save(&model_key(name), &persisted, None)?;
        Ok(())
    }

    /// Re-resolves the registered version from the artifact source and
    /// swaps the handle in.
    pub async fn reload(&self, name: &str) -> Result<ModelMetadata, RegistryError> {
        let version = self
            .get_metadata(name)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?
            .version;

        let artifact = self.artifacts.load(name, &version).await?;

        let (metadata, persisted) = {
            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            let record = models
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
            record.handle = Some(artifact.handle);
            (
                record.metadata.clone(),
                PersistedModel {
                    metadata: record.metadata.clone(),
                    baseline_metrics: record.baseline_metrics.clone(),
                },
            )
        };
        info!("Reloaded model {} version {}", name, version);
        self.snapshots.save(&model_key(name), &persisted, None)?;
        Ok(metadata)
    }

    /// Merges freshly evaluated metrics into the stored record. The
    /// registration-time baseline is left untouched.
    pub fn update_metrics(
        &self,
        name: &str,
        metrics: &FeatureVector,
    ) -> Result<ModelMetadata, RegistryError> {
        let persisted = {
            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            let record = models
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
            record.metadata.merge_metrics(metrics);
            PersistedModel {
                metadata: record.metadata.clone(),
                baseline_metrics: record.baseline_metrics.clone(),
            }
        };
        self.snapshots.save(&model_key(name), &persisted, None)?;
        Ok(persisted.metadata)
    }

    /// Assembles the monitoring view of one model.
    pub fn monitor_target(&self, name: &str) -> Option<MonitorTarget> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        let record = models.get(name)?;
        let current = &record.metadata.performance_metrics;
        Some(MonitorTarget {
            model: name.to_string(),
            handle: record.handle.clone(),
            features: record.metadata.features.clone(),
            current_metrics: (!current.is_empty()).then(|| current.clone()),
            baseline_metrics: (!record.baseline_metrics.is_empty())
                .then(|| record.baseline_metrics.clone()),
            thresholds: self.config.registration_thresholds.clone(),
        })
    }

    /// Rebuilds the in-memory table from snapshots, re-resolving handles
    /// through the artifact source. Models whose artifacts cannot be
    /// resolved come back registered but unloaded.
    pub async fn recover(&self) -> Result<usize, RegistryError> {
        let persisted: Vec<(String, PersistedModel)> =
            self.snapshots.load_all(MODEL_PREFIX)?;

        let mut recovered = 0;
        for (_, snapshot) in persisted {
            let metadata = snapshot.metadata;
            let handle = match self.artifacts.load(&metadata.name, &metadata.version).await {
                Ok(artifact) => Some(artifact.handle),
                Err(e) => {
                    warn!(
                        "Could not resolve artifact for {} {}: {}",
                        metadata.name, metadata.version, e
                    );
                    None
                }
            };

            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            models.insert(
                metadata.name.clone(),
                ModelRecord {
                    metadata,
                    baseline_metrics: snapshot.baseline_metrics,
                    handle,
                },
            );
            recovered += 1;
        }
        if recovered > 0 {
            info!("Recovered {} models from snapshots", recovered);
        }
        Ok(recovered)
    }

    /// Flushes serving counters to the store and reports how many models
    /// have gone idle past the staleness window.
    pub fn sweep_stale(&self) -> usize {
        let window = ChronoDuration::days(self.config.staleness_days);
        let persisted: Vec<(bool, PersistedModel)> = {
            let models = self.models.read().unwrap_or_else(|e| e.into_inner());
            models
                .values()
                .map(|record| {
                    (
                        record.metadata.is_stale(window),
                        PersistedModel {
                            metadata: record.metadata.clone(),
                            baseline_metrics: record.baseline_metrics.clone(),
                        },
                    )
                })
                .collect()
        };

        let mut stale = 0;
        for (is_stale, snapshot) in persisted {
            if is_stale {
                stale += 1;
                warn!(
                    "Model {} has not served in over {} days",
                    snapshot.metadata.name, self.config.staleness_days
                );
            }
            if let Err(e) = self
                .snapshots
                .save(&model_key(&snapshot.metadata.name), &snapshot, None)
            {
                warn!("Could not persist {}: {}", snapshot.metadata.name, e);
            }
        }
        stale
    }
}
