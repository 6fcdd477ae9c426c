//! Prediction volume tracking.
//!
//! Records one timestamp per served prediction and compares the most recent
//! window against the window before it. A swing beyond the configured
//! threshold marks the volume as anomalous, which the monitor folds into the
//! health score.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Window-over-window comparison for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeReport {
    pub current_count: usize,
    pub prior_count: usize,
    /// Signed relative change, `(current - prior) / prior`. `None` when the
    /// prior window is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_ratio: Option<f64>,
    pub anomalous: bool,
}

/// Per-model prediction timestamps, pruned to twice the comparison window.
#[derive(Debug, Default)]
pub struct VolumeTracker {
    events: Mutex<FxHashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one prediction for `model` at the current time.
    pub fn record(&self, model: &str) {
        self.record_at(model, Utc::now());
    }

    /// Records one prediction at an explicit timestamp, used when replaying
    /// persisted history.
    pub fn record_at(&self, model: &str, at: DateTime<Utc>) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.entry(model.to_string()).or_default().push_back(at);
    }

    /// Timestamps currently retained for `model`.
    pub fn count(&self, model: &str) -> usize {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.get(model).map(|q| q.len()).unwrap_or(0)
    }

    pub fn remove_model(&self, model: &str) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.remove(model);
    }

    /// Compares the last `window_hours` against the `window_hours` before it.
    pub fn report(&self, model: &str, window_hours: i64, threshold: f64) -> VolumeReport {
        self.report_at(model, Utc::now(), window_hours, threshold)
    }

    /// Same comparison anchored at an explicit `now`. Also prunes timestamps
    /// older than both windows.
    pub fn report_at(
        &self,
        model: &str,
        now: DateTime<Utc>,
        window_hours: i64,
        threshold: f64,
    ) -> VolumeReport {
        let window = Duration::hours(window_hours.max(1));
        let current_start = now - window;
        let prior_start = now - window - window;

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let queue = match events.get_mut(model) {
            Some(queue) => queue,
            None => {
                return VolumeReport {
                    current_count: 0,
                    prior_count: 0,
                    change_ratio: None,
                    anomalous: false,
                };
            }
        };
        while let Some(front) = queue.front() {
            if *front < prior_start {
                queue.pop_front();
            } else {
                break;
            }
        }

        let mut current_count = 0;
        let mut prior_count = 0;
        for ts in queue.iter() {
            if *ts >= current_start {
                current_count += 1;
            } else {
                prior_count += 1;
            }
        }

        let change_ratio = if prior_count > 0 {
            Some((current_count as f64 - prior_count as f64) / prior_count as f64)
        } else {
            None
        };
        let anomalous = change_ratio.map(|r| r.abs() > threshold).unwrap_or(false);

        VolumeReport {
            current_count,
            prior_count,
            change_ratio,
            anomalous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(tracker: &VolumeTracker, model: &str, now: DateTime<Utc>, hours_ago: i64, n: usize) {
        let at = now - Duration::hours(hours_ago);
        for _ in 0..n {
            tracker.record_at(model, at);
        }
    }

    #[test]
    fn test_stable_volume_is_not_anomalous() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "m", now, 30, 100); // prior window
        fill(&tracker, "m", now, 6, 110); // current window

        let report = tracker.report_at("m", now, 24, 0.5);
        assert_eq!(report.current_count, 110);
        assert_eq!(report.prior_count, 100);
        assert!(!report.anomalous, "10% growth should not be anomalous");
        let ratio = report.change_ratio.unwrap();
        assert!((ratio - 0.1).abs() < 1e-9, "expected ratio 0.1, got {}", ratio);
    }

    #[test]
    fn test_surge_is_anomalous() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "m", now, 30, 100);
        fill(&tracker, "m", now, 6, 200);

        let report = tracker.report_at("m", now, 24, 0.5);
        assert!(report.anomalous, "doubling should trip the 50% threshold");
        assert_eq!(report.change_ratio, Some(1.0));
    }

    #[test]
    fn test_collapse_is_anomalous() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "m", now, 30, 200);
        fill(&tracker, "m", now, 6, 40);

        let report = tracker.report_at("m", now, 24, 0.5);
        assert!(report.anomalous, "an 80% drop should trip the threshold");
        let ratio = report.change_ratio.unwrap();
        assert!(ratio < 0.0, "drop should have a negative ratio, got {}", ratio);
    }

    #[test]
    fn test_empty_prior_window_is_neutral() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "m", now, 6, 500);

        let report = tracker.report_at("m", now, 24, 0.5);
        assert_eq!(report.prior_count, 0);
        assert!(report.change_ratio.is_none());
        assert!(!report.anomalous, "no prior window means no comparison");
    }

    #[test]
    fn test_old_events_are_pruned() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "m", now, 100, 50); // outside both windows
        fill(&tracker, "m", now, 6, 10);

        let report = tracker.report_at("m", now, 24, 0.5);
        assert_eq!(report.current_count, 10);
        assert_eq!(report.prior_count, 0);
        assert_eq!(tracker.count("m"), 10, "stale timestamps should be dropped");
    }

    #[test]
    fn test_models_are_isolated() {
        let tracker = VolumeTracker::new();
        let now = Utc::now();
        fill(&tracker, "a", now, 6, 10);
        fill(&tracker, "b", now, 6, 20);

        assert_eq!(tracker.count("a"), 10);
        assert_eq!(tracker.count("b"), 20);
        tracker.remove_model("a");
        assert_eq!(tracker.count("a"), 0);
        assert_eq!(tracker.count("b"), 20);
    }

    #[test]
    fn test_unknown_model_reports_empty() {
        let tracker = VolumeTracker::new();
        let report = tracker.report("ghost", 24, 0.5);
        assert_eq!(report.current_count, 0);
        assert_eq!(report.prior_count, 0);
        assert!(!report.anomalous);
    }
}
