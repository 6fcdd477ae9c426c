//! Perkon Monitor - drift detection, degradation checks, and composite
//! model health.
//!
//! Serving traffic feeds the rolling windows and the volume tracker; a
//! scheduled task then drives [`monitor::ModelMonitor`] over each registered
//! model. A run probes availability, compares the live windows against the
//! pinned reference with one of the [`drift`] tests, classifies evaluation
//! metrics against thresholds, checks volume stability, and folds the
//! penalties into one health score. Breaches raise alerts through
//! [`alerts::AlertManager`].

pub mod alerts;
pub mod drift;
pub mod monitor;
pub mod performance;
pub mod volume;
pub mod window;

pub use alerts::{AlertError, AlertManager};
pub use drift::{
    DriftDetector, DriftError, DriftMethod, DriftOutcome, FeatureDriftEntry, FeatureDriftReport,
    JsDivergence, KsTest, PredictionDriftReport, Psi, StatisticalTest,
};
pub use monitor::{ModelMonitor, MonitorTarget};
pub use performance::{evaluate_degradation, DegradationReport, MetricEvaluation};
pub use volume::{VolumeReport, VolumeTracker};
pub use window::{ServingWindow, WindowSnapshot};
