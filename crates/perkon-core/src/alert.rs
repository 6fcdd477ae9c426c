//! Alert records raised by monitoring and circuit breaking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// What kind of condition the alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Availability,
    FeatureDrift,
    PredictionDrift,
    PerformanceDegraded,
    PerformanceWarning,
    VolumeAnomaly,
    InstanceDeactivated,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Availability => write!(f, "availability"),
            Self::FeatureDrift => write!(f, "feature_drift"),
            Self::PredictionDrift => write!(f, "prediction_drift"),
            Self::PerformanceDegraded => write!(f, "performance_degraded"),
            Self::PerformanceWarning => write!(f, "performance_warning"),
            Self::VolumeAnomaly => write!(f, "volume_anomaly"),
            Self::InstanceDeactivated => write!(f, "instance_deactivated"),
        }
    }
}

/// A single alert. Append-only apart from acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub model: String,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    pub fn new(model: &str, severity: AlertSeverity, kind: AlertKind, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.to_string(),
            severity,
            kind,
            message: message.to_string(),
            recommendation: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: &str) -> Self {
        self.recommendation = Some(recommendation.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn acknowledge(&mut self, who: &str) {
        self.acknowledged = true;
        self.acknowledged_by = Some(who.to_string());
        self.acknowledged_at = Some(Utc::now());
    }

    pub fn is_active(&self) -> bool {
        !self.acknowledged
    }
}
