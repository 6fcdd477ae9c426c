//! Performance degradation checks.
//!
//! Evaluates a model's current evaluation metrics against a named threshold
//! table (for regression: r2_score, mae, rmse, mape). Each metric lands in
//! ok, warning, or degraded; the report carries an overall score that the
//! monitor folds into the composite health score.

use perkon_core::config::{MetricStatus, ThresholdTable};
use perkon_core::FeatureVector;
use serde::{Deserialize, Serialize};

/// Outcome for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub metric: String,
    pub value: f64,
    pub status: MetricStatus,
    /// Baseline value recorded at registration, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    /// Relative change against the baseline, `(value - baseline) / |baseline|`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_change: Option<f64>,
}

/// Full degradation report for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationReport {
    pub performance_degraded: bool,
    pub warning_triggered: bool,
    pub degraded_metrics: Vec<String>,
    pub warning_metrics: Vec<String>,
    pub evaluations: Vec<MetricEvaluation>,
    /// Number of metrics present in both the table and the input.
    pub checked: usize,
    /// `max(0, 1 - (0.3 * degraded + 0.1 * warning) / checked)`; 1.0 when
    /// nothing was checked.
    pub overall_score: f64,
}

impl DegradationReport {
    fn empty() -> Self {
        Self {
            performance_degraded: false,
            warning_triggered: false,
            degraded_metrics: Vec::new(),
            warning_metrics: Vec::new(),
            evaluations: Vec::new(),
            checked: 0,
            overall_score: 1.0,
        }
    }
}

/// Classifies `current` against `table`, metric by metric. Metrics present in
/// the table but absent from `current` are skipped, as are non-finite values.
/// `baseline` only annotates the report; thresholds alone decide the status.
pub fn evaluate_degradation(
    current: &FeatureVector,
    baseline: Option<&FeatureVector>,
    table: &ThresholdTable,
) -> DegradationReport {
    let mut report = DegradationReport::empty();

    for (name, threshold) in table {
        let value = match current.get(name) {
            Some(v) if v.is_finite() => *v,
            _ => continue,
        };
        let status = threshold.classify(value);
        match status {
            MetricStatus::Degraded => report.degraded_metrics.push(name.clone()),
            MetricStatus::Warning => report.warning_metrics.push(name.clone()),
            MetricStatus::Ok => {}
        }

        let base = baseline.and_then(|b| b.get(name)).copied();
        let relative_change = base.and_then(|b| {
            if b.abs() > f64::EPSILON {
                Some((value - b) / b.abs())
            } else {
                None
            }
        });
        report.evaluations.push(MetricEvaluation {
            metric: name.clone(),
            value,
            status,
            baseline: base,
            relative_change,
        });
        report.checked += 1;
    }

    report.performance_degraded = !report.degraded_metrics.is_empty();
    report.warning_triggered = !report.warning_metrics.is_empty();
    if report.checked > 0 {
        let penalty = 0.3 * report.degraded_metrics.len() as f64
            + 0.1 * report.warning_metrics.len() as f64;
        report.overall_score = (1.0 - penalty / report.checked as f64).max(0.0);
    }
    report
}
