//! Composite health types produced by monitoring runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertRecord;

/// Overall health bucket for a model, derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
    Unknown,
}

impl HealthStatus {
    /// Maps a composite score in `[0, 1]` onto the default buckets.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Healthy
        } else if score >= 0.6 {
            Self::Warning
        } else if score >= 0.3 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of one monitoring step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
    /// The check itself errored and contributed nothing to the score.
    Error,
    Skipped,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One step of a monitoring run, with whatever the step measured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn passed(name: &str, detail: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Passed,
            detail,
            error: None,
        }
    }

    pub fn warning(name: &str, detail: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            detail,
            error: None,
        }
    }

    pub fn failed(name: &str, detail: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Failed,
            detail,
            error: None,
        }
    }

    pub fn errored(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            detail: serde_json::Value::Null,
            error: Some(error.to_string()),
        }
    }

    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Skipped,
            detail: serde_json::Value::Null,
            error: None,
        }
    }
}

/// Full result of one monitoring run for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub model: String,
    pub overall_health: HealthStatus,
    pub health_score: f64,
    pub checks: Vec<CheckResult>,
    #[serde(default)]
    pub alerts: Vec<AlertRecord>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(model: &str, score: f64, checks: Vec<CheckResult>) -> Self {
        Self {
            model: model.to_string(),
            overall_health: HealthStatus::from_score(score),
            health_score: score,
            checks,
            alerts: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_score_buckets() {
        assert_eq!(HealthStatus::from_score(1.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.8), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.79), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(0.6), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(0.59), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(0.3), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(0.29), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(HealthStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_check_result_constructors() {
        let ok = CheckResult::passed("availability", serde_json::json!({"loaded": true}));
        assert_eq!(ok.status, CheckStatus::Passed);
        assert!(ok.error.is_none());

        let err = CheckResult::errored("feature_drift", "empty reference sample");
        assert_eq!(err.status, CheckStatus::Error);
        assert_eq!(err.error.as_deref(), Some("empty reference sample"));
    }

    #[test]
    fn test_report_bucket_derivation() {
        let report = HealthReport::new("churn", 0.56, vec![]);
        assert_eq!(report.overall_health, HealthStatus::Degraded);
        assert!((report.health_score - 0.56).abs() < 1e-12);
    }

    #[test]
    fn test_report_serde_skips_null_detail() {
        let report = HealthReport::new(
            "churn",
            1.0,
            vec![CheckResult::skipped("prediction_drift")],
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("\"detail\""));
        assert!(json.contains("\"skipped\""));
    }
}
