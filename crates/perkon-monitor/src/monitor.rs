//! Composite health runs.
//!
//! One run walks a model through availability, feature drift, prediction
//! drift, performance, and volume checks, multiplies the penalties into a
//! single score, and maps the score onto a health bucket. Every step is
//! caught on its own so one broken check cannot abort the run; only an
//! availability failure is terminal. Reports are kept in memory and mirrored
//! into the durable store, and threshold breaches raise alerts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use perkon_core::config::{DriftConfig, MonitorConfig, ThresholdTable};
use perkon_core::{
    AlertKind, AlertRecord, AlertSeverity, CheckResult, CheckStatus, FeatureVector, HealthReport,
};
use perkon_serving::predictor::Predictor;
use perkon_serving::store::SnapshotManager;
use perkon_serving::WorkerPool;
use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::alerts::AlertManager;
use crate::drift::DriftDetector;
use crate::performance::evaluate_degradation;
use crate::volume::VolumeTracker;
use crate::window::ServingWindow;

const HEALTH_PREFIX: &str = "health:";

/// Everything one run needs to know about a model. The registry assembles
/// this so the monitor stays decoupled from registry internals.
#[derive(Clone)]
pub struct MonitorTarget {
    pub model: String,
    /// Loaded predictor, absent when the model is unloaded.
    pub handle: Option<Arc<dyn Predictor>>,
    /// Declared input schema, used to build the self-test probe.
    pub features: Vec<String>,
    pub current_metrics: Option<FeatureVector>,
    pub baseline_metrics: Option<FeatureVector>,
    pub thresholds: ThresholdTable,
}

pub struct ModelMonitor {
    config: MonitorConfig,
    drift_config: DriftConfig,
    detector: DriftDetector,
    windows: Arc<ServingWindow>,
    volume: Arc<VolumeTracker>,
    alerts: Arc<AlertManager>,
    snapshots: SnapshotManager,
    /// Offload target for the statistical computations; inline when absent.
    pool: Option<Arc<WorkerPool>>,
    history: Mutex<FxHashMap<String, VecDeque<HealthReport>>>,
}

impl ModelMonitor {
    pub fn new(
        config: MonitorConfig,
        drift_config: DriftConfig,
        windows: Arc<ServingWindow>,
        volume: Arc<VolumeTracker>,
        alerts: Arc<AlertManager>,
        snapshots: SnapshotManager,
    ) -> Self {
        Self {
            config,
            detector: DriftDetector::new(drift_config.clone()),
            drift_config,
            windows,
            volume,
            alerts,
            snapshots,
            pool: None,
            history: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.config.check_timeout_secs.max(1))
    }

    /// Runs one full health pass for `target`.
    pub async fn run(&self, target: &MonitorTarget) -> HealthReport {
        let mut checks = Vec::new();
        let mut raised = Vec::new();
        let mut score = 1.0f64;

        let availability = self.check_availability(target).await;
        let unavailable = availability.status == CheckStatus::Failed;
        if unavailable {
            let reason = availability
                .detail
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("model is not loaded")
                .to_string();
            checks.push(availability);
            raised.push(
                AlertRecord::new(
                    &target.model,
                    AlertSeverity::Critical,
                    AlertKind::Availability,
                    &format!("model is unavailable: {}", reason),
                )
                .with_recommendation(
                    "Reload the model from the artifact source or roll back to the previous version",
                ),
            );
            return self.finalize(target, 0.0, checks, raised);
        }
        checks.push(availability);

        let (check, drifted) = self.check_feature_drift(target).await;
        checks.push(check);
        if let Some(report) = drifted {
            score *= self.config.feature_drift_multiplier;
            let names: Vec<&str> = report
                .features
                .iter()
                .filter(|f| f.is_drift)
                .map(|f| f.feature.as_str())
                .collect();
            raised.push(
                AlertRecord::new(
                    &target.model,
                    AlertSeverity::Warning,
                    AlertKind::FeatureDrift,
                    &format!(
                        "{} of {} features drifted: {}",
                        names.len(),
                        report.evaluated,
                        names.join(", ")
                    ),
                )
                .with_recommendation(
                    "Retrain on recent data or refresh the reference window if the shift is expected",
                )
                .with_metadata(json!({
                    "method": report.method,
                    "mean_score": report.mean_score,
                    "drifted_features": names,
                })),
            );
        }

        let (check, shift) = self.check_prediction_drift(target).await;
        checks.push(check);
        if let Some(report) = shift {
            score *= self.config.prediction_drift_multiplier;
            raised.push(
                AlertRecord::new(
                    &target.model,
                    AlertSeverity::Warning,
                    AlertKind::PredictionDrift,
                    &format!(
                        "prediction distribution drifted (score {:.3}, mean shift {:+.3})",
                        report.score, report.mean_shift
                    ),
                )
                .with_recommendation(
                    "Compare recent outputs against the reference window and retrain if the shift persists",
                )
                .with_metadata(json!({
                    "method": report.method,
                    "score": report.score,
                    "mean_shift": report.mean_shift,
                    "std_ratio": report.std_ratio,
                })),
            );
        }

        checks.push(self.check_performance(target, &mut score, &mut raised));
        checks.push(self.check_volume(target, &mut score, &mut raised));

        self.finalize(target, score.clamp(0.0, 1.0), checks, raised)
    }

    async fn check_availability(&self, target: &MonitorTarget) -> CheckResult {
        let handle = match &target.handle {
            Some(handle) => handle.clone(),
            None => return CheckResult::failed("availability", json!({ "loaded": false })),
        };
        if target.features.is_empty() {
            // No declared schema to probe with; the loaded handle is the
            // only availability signal we have.
            return CheckResult::passed("availability", json!({ "loaded": true, "probed": false }));
        }

        let mut probe = FeatureVector::default();
        for name in &target.features {
            probe.insert(name.clone(), 0.0);
        }
        let started = std::time::Instant::now();
        match timeout(self.check_timeout(), handle.predict(&[probe])).await {
            Ok(Ok(outputs)) => CheckResult::passed(
                "availability",
                json!({
                    "loaded": true,
                    "probed": true,
                    "latency_ms": started.elapsed().as_millis() as u64,
                    "outputs": outputs.len(),
                }),
            ),
            Ok(Err(e)) => CheckResult::failed(
                "availability",
                json!({ "loaded": true, "error": e.to_string() }),
            ),
            Err(_) => CheckResult::failed(
                "availability",
                json!({
                    "loaded": true,
                    "error": format!(
                        "self-test timed out after {}s",
                        self.check_timeout().as_secs()
                    ),
                }),
            ),
        }
    }

    /// Returns the check plus the drift report when drift was detected.
    async fn check_feature_drift(
        &self,
        target: &MonitorTarget,
    ) -> (CheckResult, Option<crate::drift::FeatureDriftReport>) {
        let reference = match self.windows.reference(&target.model) {
            Some(reference) if !reference.features.is_empty() => reference,
            _ => return (CheckResult::skipped("feature_drift"), None),
        };
        let current = self.windows.current(&target.model);
        if current.len() < self.drift_config.min_samples {
            debug!(
                "Skipping feature drift for '{}': {} samples in window",
                target.model,
                current.len()
            );
            return (CheckResult::skipped("feature_drift"), None);
        }

        let detector = self.detector.clone();
        let result = self
            .offload(move || {
                detector.detect_feature_drift(&reference.features, &current.features, None)
            })
            .await;
        let report = match result {
            Ok(report) => report,
            Err(e) => return (CheckResult::errored("feature_drift", &e), None),
        };
        if report.evaluated == 0 {
            return (CheckResult::skipped("feature_drift"), None);
        }

        let detail = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
        if report.any_drift {
            (CheckResult::failed("feature_drift", detail), Some(report))
        } else {
            (CheckResult::passed("feature_drift", detail), None)
        }
    }

    async fn check_prediction_drift(
        &self,
        target: &MonitorTarget,
    ) -> (CheckResult, Option<crate::drift::PredictionDriftReport>) {
        let reference = match self.windows.reference(&target.model) {
            Some(reference) if reference.predictions.len() >= self.drift_config.min_samples => {
                reference
            }
            _ => return (CheckResult::skipped("prediction_drift"), None),
        };
        let current = self.windows.current(&target.model);
        if current.predictions.len() < self.drift_config.min_samples {
            return (CheckResult::skipped("prediction_drift"), None);
        }

        let detector = self.detector.clone();
        let result = self
            .offload(move || {
                detector.detect_prediction_drift(&reference.predictions, &current.predictions, None)
            })
            .await;
        let report = match result {
            Ok(report) => report,
            Err(e) => return (CheckResult::errored("prediction_drift", &e), None),
        };
        if let Some(note) = &report.note {
            return (CheckResult::errored("prediction_drift", note), None);
        }

        let detail = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
        if report.is_drift {
            (
                CheckResult::failed("prediction_drift", detail),
                Some(report),
            )
        } else {
            (CheckResult::passed("prediction_drift", detail), None)
        }
    }

    fn check_performance(
        &self,
        target: &MonitorTarget,
        score: &mut f64,
        raised: &mut Vec<AlertRecord>,
    ) -> CheckResult {
        let metrics = match &target.current_metrics {
            Some(metrics) if !metrics.is_empty() => metrics,
            _ => return CheckResult::skipped("performance"),
        };
        let report =
            evaluate_degradation(metrics, target.baseline_metrics.as_ref(), &target.thresholds);
        if report.checked == 0 {
            return CheckResult::skipped("performance");
        }
        let detail = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);

        if report.performance_degraded {
            *score *= self.config.degraded_multiplier;
            raised.push(
                AlertRecord::new(
                    &target.model,
                    AlertSeverity::Critical,
                    AlertKind::PerformanceDegraded,
                    &format!(
                        "metrics beyond hard thresholds: {}",
                        report.degraded_metrics.join(", ")
                    ),
                )
                .with_recommendation("Retrain the model or roll back to the previous version")
                .with_metadata(detail.clone()),
            );
            CheckResult::failed("performance", detail)
        } else if report.warning_triggered {
            *score *= self.config.warning_multiplier;
            raised.push(
                AlertRecord::new(
                    &target.model,
                    AlertSeverity::Warning,
                    AlertKind::PerformanceWarning,
                    &format!(
                        "metrics inside the warning band: {}",
                        report.warning_metrics.join(", ")
                    ),
                )
                .with_recommendation("Schedule retraining before the hard thresholds are crossed")
                .with_metadata(detail.clone()),
            );
            CheckResult::warning("performance", detail)
        } else {
            CheckResult::passed("performance", detail)
        }
    }

    fn check_volume(
        &self,
        target: &MonitorTarget,
        score: &mut f64,
        raised: &mut Vec<AlertRecord>,
    ) -> CheckResult {
        let report = self.volume.report(
            &target.model,
            self.config.volume_window_hours,
            self.config.volume_change_threshold,
        );
        let detail = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
        if !report.anomalous {
            return CheckResult::passed("volume", detail);
        }

        *score *= self.config.volume_multiplier;
        let ratio = report.change_ratio.unwrap_or(0.0);
        raised.push(
            AlertRecord::new(
                &target.model,
                AlertSeverity::Info,
                AlertKind::VolumeAnomaly,
                &format!(
                    "prediction volume changed {:+.0}% against the prior {}h window",
                    ratio * 100.0,
                    self.config.volume_window_hours
                ),
            )
            .with_recommendation("Check upstream traffic sources and scheduled batch jobs")
            .with_metadata(detail.clone()),
        );
        CheckResult::warning("volume", detail)
    }

    /// Builds the report, raises the alerts, and persists both.
    fn finalize(
        &self,
        target: &MonitorTarget,
        score: f64,
        checks: Vec<CheckResult>,
        raised: Vec<AlertRecord>,
    ) -> HealthReport {
        let mut report = HealthReport::new(&target.model, score, checks);
        report.overall_health = self.config.classify(score);
        report.alerts = raised.clone();

        for alert in raised {
            if let Err(e) = self.alerts.raise(alert) {
                warn!("Failed to persist alert for '{}': {}", target.model, e);
            }
        }

        let key = format!(
            "{}{}:{:020}",
            HEALTH_PREFIX,
            target.model,
            report.timestamp.timestamp_millis()
        );
        if let Err(e) = self.snapshots.save(&key, &report, None) {
            warn!("Failed to persist health report for '{}': {}", target.model, e);
        }
        let prefix = format!("{}{}:", HEALTH_PREFIX, target.model);
        if let Err(e) = self
            .snapshots
            .prune_prefix(&prefix, self.config.report_history)
        {
            warn!("Failed to prune health reports for '{}': {}", target.model, e);
        }

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let entry = history.entry(target.model.clone()).or_default();
        if entry.len() >= self.config.report_history.max(1) {
            entry.pop_front();
        }
        entry.push_back(report.clone());

        report
    }

    async fn offload<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match &self.pool {
            Some(pool) => match timeout(self.check_timeout(), pool.run(f)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "check timed out after {}s",
                    self.check_timeout().as_secs()
                )),
            },
            None => Ok(f()),
        }
    }

    /// Most recent report for a model, if any run has completed.
    pub fn latest(&self, model: &str) -> Option<HealthReport> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(model).and_then(|h| h.back().cloned())
    }

    /// Retained reports, newest first.
    pub fn history(&self, model: &str, limit: usize) -> Vec<HealthReport> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        match history.get(model) {
            Some(reports) => reports.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn forget(&self, model: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.remove(model);
    }
}
