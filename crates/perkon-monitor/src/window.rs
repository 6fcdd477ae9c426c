//! Rolling serving windows.
//!
//! Keeps the most recent feature vectors and predictions served per model,
//! plus a pinned reference window to drift against. The reference is set
//! explicitly, either from artifact training statistics or by promoting the
//! current window after a warm-up period.

use std::collections::VecDeque;
use std::sync::Mutex;

use perkon_core::FeatureVector;
use rustc_hash::FxHashMap;

/// Feature samples in column form plus the matching predictions.
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    pub features: FxHashMap<String, Vec<f64>>,
    pub predictions: Vec<f64>,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

#[derive(Debug, Default)]
struct ModelWindow {
    samples: VecDeque<(FeatureVector, f64)>,
    reference: Option<WindowSnapshot>,
}

/// Bounded per-model sample windows.
#[derive(Debug)]
pub struct ServingWindow {
    capacity: usize,
    windows: Mutex<FxHashMap<String, ModelWindow>>,
}

impl ServingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: Mutex::new(FxHashMap::default()),
        }
    }

    /// Appends one served sample, evicting the oldest once at capacity.
    pub fn record(&self, model: &str, features: &FeatureVector, prediction: f64) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(model.to_string()).or_default();
        if window.samples.len() >= self.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back((features.clone(), prediction));
    }

    pub fn sample_count(&self, model: &str) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get(model).map(|w| w.samples.len()).unwrap_or(0)
    }

    /// Current window in column form. Features absent from a sample are
    /// simply absent from that column, so columns may differ in length.
    pub fn current(&self, model: &str) -> WindowSnapshot {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match windows.get(model) {
            Some(window) => columns_of(&window.samples),
            None => WindowSnapshot::default(),
        }
    }

    pub fn reference(&self, model: &str) -> Option<WindowSnapshot> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get(model).and_then(|w| w.reference.clone())
    }

    /// Pins an explicit reference window, e.g. from training statistics.
    pub fn set_reference(&self, model: &str, snapshot: WindowSnapshot) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.entry(model.to_string()).or_default().reference = Some(snapshot);
    }

    /// Promotes the current window to reference. Returns false when the
    /// window is empty and nothing was pinned.
    pub fn promote_reference(&self, model: &str) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = match windows.get_mut(model) {
            Some(window) if !window.samples.is_empty() => window,
            _ => return false,
        };
        window.reference = Some(columns_of(&window.samples));
        true
    }

    /// Drops the current samples but keeps the reference.
    pub fn clear_current(&self, model: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.get_mut(model) {
            window.samples.clear();
        }
    }

    pub fn remove_model(&self, model: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(model);
    }
}

fn columns_of(samples: &VecDeque<(FeatureVector, f64)>) -> WindowSnapshot {
    let mut snapshot = WindowSnapshot::default();
    for (features, prediction) in samples {
        for (name, value) in features {
            snapshot
                .features
                .entry(name.clone())
                .or_insert_with(Vec::new)
                .push(*value);
        }
        snapshot.predictions.push(*prediction);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pairs: &[(&str, f64)]) -> FeatureVector {
        let mut v = FeatureVector::default();
        for (name, value) in pairs {
            v.insert((*name).into(), *value);
        }
        v
    }

    #[test]
    fn test_record_and_columns() {
        let window = ServingWindow::new(100);
        window.record("m", &sample(&[("age", 30.0), ("income", 50.0)]), 0.7);
        window.record("m", &sample(&[("age", 40.0), ("income", 60.0)]), 0.9);

        let snap = window.current("m");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.features["age"], vec![30.0, 40.0]);
        assert_eq!(snap.features["income"], vec![50.0, 60.0]);
        assert_eq!(snap.predictions, vec![0.7, 0.9]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let window = ServingWindow::new(3);
        for i in 0..5 {
            window.record("m", &sample(&[("x", i as f64)]), i as f64);
        }
        let snap = window.current("m");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.features["x"], vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_promote_reference() {
        let window = ServingWindow::new(100);
        assert!(!window.promote_reference("m"), "empty window cannot be promoted");

        window.record("m", &sample(&[("x", 1.0)]), 1.0);
        window.record("m", &sample(&[("x", 2.0)]), 2.0);
        assert!(window.promote_reference("m"));

        // New samples must not leak into the pinned reference.
        window.record("m", &sample(&[("x", 99.0)]), 99.0);
        let reference = window.reference("m").unwrap();
        assert_eq!(reference.features["x"], vec![1.0, 2.0]);
        assert_eq!(window.current("m").len(), 3);
    }

    #[test]
    fn test_set_reference_from_training_data() {
        let window = ServingWindow::new(100);
        let mut snapshot = WindowSnapshot::default();
        snapshot.features.insert("x".into(), vec![1.0, 2.0, 3.0]);
        snapshot.predictions = vec![0.1, 0.2, 0.3];
        window.set_reference("m", snapshot);

        let reference = window.reference("m").unwrap();
        assert_eq!(reference.features["x"].len(), 3);
        assert_eq!(window.sample_count("m"), 0, "reference should not add samples");
    }

    #[test]
    fn test_sparse_features_make_ragged_columns() {
        let window = ServingWindow::new(100);
        window.record("m", &sample(&[("a", 1.0), ("b", 2.0)]), 0.0);
        window.record("m", &sample(&[("a", 3.0)]), 0.0);

        let snap = window.current("m");
        assert_eq!(snap.features["a"].len(), 2);
        assert_eq!(snap.features["b"].len(), 1);
    }

    #[test]
    fn test_clear_current_keeps_reference() {
        let window = ServingWindow::new(100);
        window.record("m", &sample(&[("x", 1.0)]), 1.0);
        window.promote_reference("m");
        window.clear_current("m");

        assert_eq!(window.sample_count("m"), 0);
        assert!(window.reference("m").is_some());
    }

    #[test]
    fn test_remove_model_drops_everything() {
        let window = ServingWindow::new(100);
        window.record("m", &sample(&[("x", 1.0)]), 1.0);
        window.promote_reference("m");
        window.remove_model("m");

        assert_eq!(window.sample_count("m"), 0);
        assert!(window.reference("m").is_none());
    }
}
