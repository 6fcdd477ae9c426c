//! Tunable policy for the whole control plane.
//!
//! Every threshold the plane applies at runtime (cache TTLs, concurrency
//! bounds, circuit-breaker trip points, drift cutoffs, health multipliers)
//! is a named field here with its production default. Deployments override
//! them through the config file instead of patching call sites.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::health::HealthStatus;
use crate::FeatureVector;

/// Top-level policy configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneConfig {
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub balancer: BalancerConfig,
    pub drift: DriftConfig,
    pub monitor: MonitorConfig,
    pub registry: RegistryConfig,
    pub alerts: AlertConfig,
}

/// Logical cache namespaces, each with its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    Prediction,
    Feature,
    Metadata,
    BatchResult,
    ReferenceData,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prediction => "prediction",
            Self::Feature => "feature",
            Self::Metadata => "metadata",
            Self::BatchResult => "batch_result",
            Self::ReferenceData => "reference_data",
        }
    }
}

impl std::fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub prediction_ttl_secs: u64,
    pub feature_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
    pub batch_result_ttl_secs: u64,
    pub reference_data_ttl_secs: u64,
    /// Entry cap before eviction kicks in.
    pub max_entries: usize,
    pub auto_tune: AutoTuneConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prediction_ttl_secs: 300,
            feature_ttl_secs: 600,
            metadata_ttl_secs: 3600,
            batch_result_ttl_secs: 3600,
            reference_data_ttl_secs: 1800,
            max_entries: 100_000,
            auto_tune: AutoTuneConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        let secs = match namespace {
            CacheNamespace::Prediction => self.prediction_ttl_secs,
            CacheNamespace::Feature => self.feature_ttl_secs,
            CacheNamespace::Metadata => self.metadata_ttl_secs,
            CacheNamespace::BatchResult => self.batch_result_ttl_secs,
            CacheNamespace::ReferenceData => self.reference_data_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Bands and factors for hit-rate driven TTL tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneConfig {
    /// Hit rate above which TTLs shrink (entries live longer than needed).
    pub high_hit_rate: f64,
    /// Hit rate below which TTLs grow (entries expire before reuse).
    pub low_hit_rate: f64,
    pub shrink_factor: f64,
    pub grow_factor: f64,
    pub min_ttl_secs: u64,
    pub max_ttl_secs: u64,
    /// How often the background tuning pass runs.
    pub interval_secs: u64,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            high_hit_rate: 0.8,
            low_hit_rate: 0.3,
            shrink_factor: 0.9,
            grow_factor: 1.2,
            min_ttl_secs: 30,
            max_ttl_secs: 7200,
            interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Concurrent chunks in flight per batch.
    pub chunk_concurrency: usize,
    /// Per-item concurrency when items are dispatched individually.
    pub item_concurrency: usize,
    /// Bounded pool for blocking work inside batch workers.
    pub worker_threads: usize,
    /// Latency target the adaptive sizer steers chunk duration toward.
    pub target_batch_ms: u64,
    /// How many recent batch durations the sizer averages over.
    pub adapt_window: usize,
    pub shrink_factor: f64,
    pub grow_factor: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 100,
            min_chunk_size: 10,
            chunk_concurrency: 5,
            item_concurrency: 10,
            worker_threads: 4,
            target_batch_ms: 5000,
            adapt_window: 10,
            shrink_factor: 0.8,
            grow_factor: 1.2,
        }
    }
}

/// Instance routing strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategyKind {
    RoundRobin,
    Weighted,
    LeastLoaded,
}

impl std::fmt::Display for RoutingStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Weighted => write!(f, "weighted"),
            Self::LeastLoaded => write!(f, "least_loaded"),
        }
    }
}

impl std::str::FromStr for RoutingStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            "least_loaded" => Ok(Self::LeastLoaded),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Error rate above which an instance is taken out of rotation.
    pub error_rate_threshold: f64,
    /// Requests an instance must have served before the breaker evaluates it.
    pub min_requests_for_trip: u64,
    pub default_strategy: RoutingStrategyKind,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.10,
            min_requests_for_trip: 10,
            default_strategy: RoutingStrategyKind::RoundRobin,
        }
    }
}

/// Statistical drift test selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethodKind {
    KsTest,
    JsDivergence,
    Psi,
    StatisticalTest,
}

impl std::fmt::Display for DriftMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KsTest => write!(f, "ks_test"),
            Self::JsDivergence => write!(f, "js_divergence"),
            Self::Psi => write!(f, "psi"),
            Self::StatisticalTest => write!(f, "statistical_test"),
        }
    }
}

impl std::str::FromStr for DriftMethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ks_test" => Ok(Self::KsTest),
            "js_divergence" => Ok(Self::JsDivergence),
            "psi" => Ok(Self::Psi),
            "statistical_test" => Ok(Self::StatisticalTest),
            other => Err(format!("unknown drift method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// KS-test significance level.
    pub ks_alpha: f64,
    /// Jensen-Shannon distance above which drift is flagged.
    pub js_threshold: f64,
    /// PSI above which drift is flagged.
    pub psi_threshold: f64,
    /// Significance level for the combined Welch/F test.
    pub statistical_alpha: f64,
    /// Shared-bin count for the histogram-based methods.
    pub histogram_bins: usize,
    /// Below this many samples a method reports no-drift with a note.
    pub min_samples: usize,
    pub default_method: DriftMethodKind,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            ks_alpha: 0.05,
            js_threshold: 0.10,
            psi_threshold: 0.20,
            statistical_alpha: 0.05,
            histogram_bins: 10,
            min_samples: 10,
            default_method: DriftMethodKind::KsTest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub feature_drift_multiplier: f64,
    pub prediction_drift_multiplier: f64,
    pub degraded_multiplier: f64,
    pub warning_multiplier: f64,
    pub volume_multiplier: f64,
    /// Relative volume change (24h vs the prior 24h) that counts as anomalous.
    pub volume_change_threshold: f64,
    pub volume_window_hours: i64,
    /// Timeout applied to each individual monitoring step.
    pub check_timeout_secs: u64,
    /// Scheduled monitoring cadence.
    pub interval_secs: u64,
    /// Health reports kept in memory per model.
    pub report_history: usize,
    /// Serving samples retained per model for drift comparisons.
    pub window_capacity: usize,
    pub healthy_floor: f64,
    pub warning_floor: f64,
    pub degraded_floor: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            feature_drift_multiplier: 0.7,
            prediction_drift_multiplier: 0.8,
            degraded_multiplier: 0.5,
            warning_multiplier: 0.85,
            volume_multiplier: 0.9,
            volume_change_threshold: 0.5,
            volume_window_hours: 24,
            check_timeout_secs: 10,
            interval_secs: 300,
            report_history: 50,
            window_capacity: 1000,
            healthy_floor: 0.8,
            warning_floor: 0.6,
            degraded_floor: 0.3,
        }
    }
}

impl MonitorConfig {
    /// Maps a composite score onto the configured health buckets.
    pub fn classify(&self, score: f64) -> HealthStatus {
        if score >= self.healthy_floor {
            HealthStatus::Healthy
        } else if score >= self.warning_floor {
            HealthStatus::Warning
        } else if score >= self.degraded_floor {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        }
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Days without serving before a model is tagged stale.
    pub staleness_days: i64,
    /// Timeout for the dummy-input self test behind health tags.
    pub self_test_timeout_secs: u64,
    /// How often the staleness sweep runs.
    pub sweep_interval_secs: u64,
    /// Metric bounds a candidate must satisfy to register.
    pub registration_thresholds: ThresholdTable,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            staleness_days: 7,
            self_test_timeout_secs: 10,
            sweep_interval_secs: 3600,
            registration_thresholds: regression_thresholds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts older than this are pruned regardless of acknowledgment.
    pub retention_days: i64,
    pub prune_interval_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            prune_interval_secs: 3600,
        }
    }
}

/// Bounds for one named metric. `min`/`max` are hard bounds; the `warn_*`
/// variants mark the early-warning band before the hard bound.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThreshold {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_max: Option<f64>,
}

/// Evaluation outcome for one metric against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Ok,
    Warning,
    Degraded,
}

impl MetricThreshold {
    pub fn classify(&self, value: f64) -> MetricStatus {
        if let Some(min) = self.min {
            if value < min {
                return MetricStatus::Degraded;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return MetricStatus::Degraded;
            }
        }
        if let Some(warn_min) = self.warn_min {
            if value < warn_min {
                return MetricStatus::Warning;
            }
        }
        if let Some(warn_max) = self.warn_max {
            if value > warn_max {
                return MetricStatus::Warning;
            }
        }
        MetricStatus::Ok
    }
}

/// Named metric bounds, ordered as configured.
pub type ThresholdTable = IndexMap<String, MetricThreshold>;

/// Default regression threshold table.
pub fn regression_thresholds() -> ThresholdTable {
    let mut table = ThresholdTable::new();
    table.insert(
        "r2_score".into(),
        MetricThreshold {
            min: Some(0.80),
            warn_min: Some(0.85),
            ..Default::default()
        },
    );
    table.insert(
        "mae".into(),
        MetricThreshold {
            max: Some(0.15),
            warn_max: Some(0.12),
            ..Default::default()
        },
    );
    table.insert(
        "rmse".into(),
        MetricThreshold {
            max: Some(0.20),
            warn_max: Some(0.17),
            ..Default::default()
        },
    );
    table.insert(
        "mape".into(),
        MetricThreshold {
            max: Some(15.0),
            warn_max: Some(12.0),
            ..Default::default()
        },
    );
    table
}

/// Hard-bound violations of `metrics` against `table`. Metrics absent from
/// either side are not checked.
pub fn hard_violations(table: &ThresholdTable, metrics: &FeatureVector) -> Vec<String> {
    let mut violations = Vec::new();
    for (name, threshold) in table {
        if let Some(value) = metrics.get(name) {
            if let Some(min) = threshold.min {
                if *value < min {
                    violations.push(format!("{} = {} below minimum {}", name, value, min));
                }
            }
            if let Some(max) = threshold.max {
                if *value > max {
                    violations.push(format!("{} = {} above maximum {}", name, value, max));
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls_match_policy() {
        let cfg = CacheConfig::default();
        assert_eq!(
            cfg.ttl_for(CacheNamespace::Prediction),
            Duration::from_secs(300)
        );
        assert_eq!(
            cfg.ttl_for(CacheNamespace::Feature),
            Duration::from_secs(600)
        );
        assert_eq!(
            cfg.ttl_for(CacheNamespace::BatchResult),
            Duration::from_secs(3600)
        );
        assert_eq!(
            cfg.ttl_for(CacheNamespace::ReferenceData),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_default_batch_bounds() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.chunk_concurrency, 5);
        assert_eq!(cfg.item_concurrency, 10);
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.min_chunk_size, 10);
        assert_eq!(cfg.target_batch_ms, 5000);
    }

    #[test]
    fn test_default_monitor_multipliers() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.feature_drift_multiplier, 0.7);
        assert_eq!(cfg.prediction_drift_multiplier, 0.8);
        assert_eq!(cfg.degraded_multiplier, 0.5);
        assert_eq!(cfg.warning_multiplier, 0.85);
        assert_eq!(cfg.volume_multiplier, 0.9);
    }

    #[test]
    fn test_classify_uses_configured_floors() {
        let mut cfg = MonitorConfig::default();
        assert_eq!(cfg.classify(0.85), HealthStatus::Healthy);
        assert_eq!(cfg.classify(0.7), HealthStatus::Warning);
        assert_eq!(cfg.classify(0.4), HealthStatus::Degraded);
        assert_eq!(cfg.classify(0.1), HealthStatus::Critical);

        cfg.healthy_floor = 0.95;
        assert_eq!(cfg.classify(0.85), HealthStatus::Warning);
    }

    #[test]
    fn test_metric_threshold_classify() {
        let t = MetricThreshold {
            min: Some(0.80),
            warn_min: Some(0.85),
            ..Default::default()
        };
        assert_eq!(t.classify(0.90), MetricStatus::Ok);
        assert_eq!(t.classify(0.82), MetricStatus::Warning);
        assert_eq!(t.classify(0.75), MetricStatus::Degraded);

        let t = MetricThreshold {
            max: Some(0.15),
            warn_max: Some(0.12),
            ..Default::default()
        };
        assert_eq!(t.classify(0.05), MetricStatus::Ok);
        assert_eq!(t.classify(0.13), MetricStatus::Warning);
        assert_eq!(t.classify(0.20), MetricStatus::Degraded);
    }

    #[test]
    fn test_hard_violations() {
        let table = regression_thresholds();
        let mut metrics = FeatureVector::default();
        metrics.insert("r2_score".into(), 0.75);
        metrics.insert("mae".into(), 0.20);
        metrics.insert("rmse".into(), 0.10);

        let violations = hard_violations(&table, &metrics);
        assert_eq!(violations.len(), 2, "expected 2 violations, got {:?}", violations);
        assert!(violations[0].contains("r2_score"));
        assert!(violations[1].contains("mae"));
    }

    #[test]
    fn test_hard_violations_ignores_warning_band() {
        let table = regression_thresholds();
        let mut metrics = FeatureVector::default();
        // Inside the warning band but above the hard minimum.
        metrics.insert("r2_score".into(), 0.82);
        assert!(hard_violations(&table, &metrics).is_empty());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"balancer": {"error_rate_threshold": 0.25}}"#;
        let cfg: PlaneConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.balancer.error_rate_threshold, 0.25);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.balancer.min_requests_for_trip, 10);
        assert_eq!(cfg.cache.prediction_ttl_secs, 300);
        assert_eq!(cfg.monitor.degraded_multiplier, 0.5);
    }

    #[test]
    fn test_strategy_kind_roundtrip() {
        for kind in [
            RoutingStrategyKind::RoundRobin,
            RoutingStrategyKind::Weighted,
            RoutingStrategyKind::LeastLoaded,
        ] {
            let parsed: RoutingStrategyKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("random".parse::<RoutingStrategyKind>().is_err());
    }

    #[test]
    fn test_drift_method_kind_serde() {
        assert_eq!(
            serde_json::to_string(&DriftMethodKind::KsTest).unwrap(),
            "\"ks_test\""
        );
        let parsed: DriftMethodKind = serde_json::from_str("\"js_divergence\"").unwrap();
        assert_eq!(parsed, DriftMethodKind::JsDivergence);
    }
}
