//! # Perkon Core
//!
//! Foundational types for the Perkon model-serving control plane.
//!
//! This crate provides the data model shared by every other Perkon crate:
//!
//! - **Models**: metadata records, deployed instances, health tags
//! - **Health**: composite health reports and per-check results
//! - **Alerts**: alert records with severity and acknowledgment
//! - **Config**: every tunable policy knob with its production default
//!
//! ## Modules
//!
//! - [`model`]: `ModelMetadata`, `ModelInstance`, `InstanceId`
//! - [`health`]: `HealthStatus`, `CheckResult`, `HealthReport`
//! - [`alert`]: `AlertRecord`, `AlertSeverity`, `AlertKind`
//! - [`config`]: `PlaneConfig` and its per-component sections
//!
//! ## See Also
//!
//! - [`perkon_serving`](../perkon_serving): cache, batching, routing
//! - [`perkon_monitor`](../perkon_monitor): drift and health monitoring
//! - [`perkon_control`](../perkon_control): registry and REST API

pub mod alert;
pub mod config;
pub mod health;
pub mod model;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

/// Insertion-ordered map used for feature vectors and metric sets.
///
/// Insertion order is preserved so canonicalization (sorting by key) is an
/// explicit step where it matters, e.g. cache key derivation.
pub type FeatureVector = IndexMap<String, f64, FxBuildHasher>;

pub use alert::{AlertKind, AlertRecord, AlertSeverity};
pub use config::{CacheNamespace, DriftMethodKind, PlaneConfig, RoutingStrategyKind};
pub use health::{CheckResult, CheckStatus, HealthReport, HealthStatus};
pub use model::{InstanceId, InstanceInfo, ModelHealthTag, ModelInstance, ModelMetadata};
