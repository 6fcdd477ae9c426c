//! Alert storage and lifecycle.
//!
//! Alerts raised by the monitor and the circuit breaker land here. The
//! manager keeps them in memory for queries and mirrors every mutation into
//! the durable store, so restarts recover the open alert set. Acknowledging
//! an alert removes it from the active view but keeps it in history until
//! retention pruning drops it.

use std::sync::Mutex;

use chrono::{Duration, Utc};
use perkon_core::config::AlertConfig;
use perkon_core::{AlertRecord, AlertSeverity};
use perkon_serving::store::{SnapshotManager, StoreError};
use thiserror::Error;
use tracing::{info, warn};

const ALERT_PREFIX: &str = "alert:";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),
    #[error("alert already acknowledged: {0}")]
    AlreadyAcknowledged(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AlertManager {
    config: AlertConfig,
    alerts: Mutex<Vec<AlertRecord>>,
    snapshots: SnapshotManager,
}

impl AlertManager {
    pub fn new(snapshots: SnapshotManager, config: AlertConfig) -> Self {
        Self {
            config,
            alerts: Mutex::new(Vec::new()),
            snapshots,
        }
    }

    /// Reloads persisted alerts, typically at startup.
    pub fn recover(&self) -> Result<usize, AlertError> {
        let records: Vec<(String, AlertRecord)> = self.snapshots.load_all(ALERT_PREFIX)?;
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        alerts.clear();
        for (_, record) in records {
            alerts.push(record);
        }
        alerts.sort_by_key(|a| a.created_at);
        if !alerts.is_empty() {
            info!("Recovered {} alerts from the store", alerts.len());
        }
        Ok(alerts.len())
    }

    /// Stores and persists a new alert. The in-memory view is updated even
    /// when the store write fails, so the alert stays queryable.
    pub fn raise(&self, alert: AlertRecord) -> Result<(), AlertError> {
        warn!(
            "Alert [{}] {} for model '{}': {}",
            alert.severity, alert.kind, alert.model, alert.message
        );
        {
            let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
            alerts.push(alert.clone());
        }
        self.snapshots.save(&alert_key(&alert), &alert, None)?;
        Ok(())
    }

    /// Unacknowledged alerts, newest first, optionally narrowed by model
    /// and/or minimum severity.
    pub fn active(&self, model: Option<&str>, severity: Option<AlertSeverity>) -> Vec<AlertRecord> {
        let alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<AlertRecord> = alerts
            .iter()
            .filter(|a| a.is_active())
            .filter(|a| model.map(|m| a.model == m).unwrap_or(true))
            .filter(|a| severity.map(|s| a.severity >= s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Every retained alert for a model (or all models), newest first.
    pub fn history(&self, model: Option<&str>, limit: usize) -> Vec<AlertRecord> {
        let alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<AlertRecord> = alerts
            .iter()
            .filter(|a| model.map(|m| a.model == m).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    /// Marks an alert as acknowledged and persists the change.
    pub fn acknowledge(&self, id: &str, who: &str) -> Result<AlertRecord, AlertError> {
        let updated = {
            let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
            if alert.acknowledged {
                return Err(AlertError::AlreadyAcknowledged(id.to_string()));
            }
            alert.acknowledge(who);
            alert.clone()
        };
        self.snapshots.save(&alert_key(&updated), &updated, None)?;
        info!("Alert {} acknowledged by {}", id, who);
        Ok(updated)
    }

    /// Drops alerts older than the retention window from memory and store.
    /// Returns how many were removed.
    pub fn prune(&self) -> Result<usize, AlertError> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days.max(1));
        let expired: Vec<AlertRecord> = {
            let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
            let (expired, kept): (Vec<_>, Vec<_>) =
                alerts.drain(..).partition(|a| a.created_at < cutoff);
            *alerts = kept;
            expired
        };
        for alert in &expired {
            self.snapshots.delete(&alert_key(alert))?;
        }
        if !expired.is_empty() {
            info!("Pruned {} expired alerts", expired.len());
        }
        Ok(expired.len())
    }

    pub fn active_count(&self) -> usize {
        let alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        alerts.iter().filter(|a| a.is_active()).count()
    }
}

/// Store key with a sortable timestamp component.
fn alert_key(alert: &AlertRecord) -> String {
    format!(
        "{}{:020}:{}",
        ALERT_PREFIX,
        alert.created_at.timestamp_millis(),
        alert.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use perkon_core::AlertKind;
    use perkon_serving::store::{FileStore, MemoryStore};
    use std::sync::Arc;

    fn manager() -> AlertManager {
        let store = Arc::new(MemoryStore::new());
        AlertManager::new(SnapshotManager::new(store), AlertConfig::default())
    }

    fn alert(model: &str, severity: AlertSeverity) -> AlertRecord {
        AlertRecord::new(model, severity, AlertKind::FeatureDrift, "drift detected")
    }

    #[test]
    fn test_raise_and_query_active() {
        let manager = manager();
        manager.raise(alert("a", AlertSeverity::Warning)).unwrap();
        manager.raise(alert("b", AlertSeverity::Critical)).unwrap();

        assert_eq!(manager.active(None, None).len(), 2);
        assert_eq!(manager.active(Some("a"), None).len(), 1);
        assert_eq!(
            manager.active(None, Some(AlertSeverity::Critical)).len(),
            1,
            "severity filter is a minimum bound"
        );
    }

    #[test]
    fn test_active_is_newest_first() {
        let manager = manager();
        let mut first = alert("m", AlertSeverity::Info);
        first.created_at = Utc::now() - Duration::minutes(10);
        let second = alert("m", AlertSeverity::Info);
        manager.raise(first.clone()).unwrap();
        manager.raise(second.clone()).unwrap();

        let active = manager.active(None, None);
        assert_eq!(active[0].id, second.id, "newest alert should come first");
        assert_eq!(active[1].id, first.id);
    }

    #[test]
    fn test_acknowledge_removes_from_active_keeps_history() {
        let manager = manager();
        let record = alert("m", AlertSeverity::Warning);
        let id = record.id.clone();
        manager.raise(record).unwrap();

        let updated = manager.acknowledge(&id, "oncall").unwrap();
        assert!(!updated.is_active());
        assert!(manager.active(None, None).is_empty());

        let history = manager.history(Some("m"), 10);
        assert_eq!(history.len(), 1, "acknowledged alert must stay in history");
        assert_eq!(history[0].acknowledged_by.as_deref(), Some("oncall"));
    }

    #[test]
    fn test_acknowledge_unknown_and_double() {
        let manager = manager();
        assert!(matches!(
            manager.acknowledge("nope", "me"),
            Err(AlertError::NotFound(_))
        ));

        let record = alert("m", AlertSeverity::Info);
        let id = record.id.clone();
        manager.raise(record).unwrap();
        manager.acknowledge(&id, "me").unwrap();
        assert!(matches!(
            manager.acknowledge(&id, "me"),
            Err(AlertError::AlreadyAcknowledged(_))
        ));
    }

    #[test]
    fn test_prune_drops_old_alerts() {
        let manager = manager();
        let mut old = alert("m", AlertSeverity::Warning);
        old.created_at = Utc::now() - Duration::days(30);
        manager.raise(old).unwrap();
        manager.raise(alert("m", AlertSeverity::Warning)).unwrap();

        let removed = manager.prune().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(manager.history(None, 10).len(), 1);
    }

    #[test]
    fn test_recover_from_store() {
        let store = Arc::new(MemoryStore::new());
        let manager = AlertManager::new(
            SnapshotManager::new(store.clone()),
            AlertConfig::default(),
        );
        manager.raise(alert("m", AlertSeverity::Critical)).unwrap();
        manager.raise(alert("m", AlertSeverity::Info)).unwrap();

        let fresh = AlertManager::new(SnapshotManager::new(store), AlertConfig::default());
        assert_eq!(fresh.active(None, None).len(), 0, "empty before recovery");
        let recovered = fresh.recover().unwrap();
        assert_eq!(recovered, 2);
        assert_eq!(fresh.active(None, None).len(), 2);
    }

    #[test]
    fn test_recover_survives_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let manager =
                AlertManager::new(SnapshotManager::new(store), AlertConfig::default());
            let record = alert("m", AlertSeverity::Critical);
            let id = record.id.clone();
            manager.raise(record).unwrap();
            manager.acknowledge(&id, "oncall").unwrap();
            id
        };

        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let manager = AlertManager::new(SnapshotManager::new(store), AlertConfig::default());
        manager.recover().unwrap();

        assert!(manager.active(None, None).is_empty(), "ack must survive restart");
        let history = manager.history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert!(history[0].acknowledged);
    }

    #[test]
    fn test_history_limit() {
        let manager = manager();
        for _ in 0..5 {
            manager.raise(alert("m", AlertSeverity::Info)).unwrap();
        }
        assert_eq!(manager.history(None, 3).len(), 3);
    }
}
