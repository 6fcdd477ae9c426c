//! Process-wide wiring.
//!
//! [`AppContext`] owns every long-lived component, runs startup recovery,
//! schedules the maintenance loops, and exposes the serving entry points
//! the API layer calls into.

use crate::artifact::ArtifactSource;
use crate::registry::{ModelRegistry, RegistryError};
use perkon_core::alert::{AlertKind, AlertRecord, AlertSeverity};
use perkon_core::config::PlaneConfig;
use perkon_core::health::{HealthReport, HealthStatus};
use perkon_core::FeatureVector;
use perkon_monitor::alerts::{AlertError, AlertManager};
use perkon_monitor::monitor::ModelMonitor;
use perkon_monitor::volume::VolumeTracker;
use perkon_monitor::window::ServingWindow;
use perkon_serving::balancer::{LoadBalancer, TripEvent, TripObserver};
use perkon_serving::batch::BatchProcessor;
use perkon_serving::cache::TtlCache;
use perkon_serving::metrics::Metrics;
use perkon_serving::optimizer::{
    BatchResponse, OptimizeError, OptimizedResponse, PerformanceOptimizer,
};
use perkon_serving::pool::{WorkerPool, WorkerPoolConfig};
use perkon_serving::store::{SnapshotManager, TtlStore};
use perkon_serving::timer::TaskManager;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
    #[error(transparent)]
    Alert(#[from] AlertError),
}

/// Bridges circuit-breaker trips into the alert stream.
struct TripAlerts {
    alerts: Arc<AlertManager>,
    metrics: Metrics,
}

impl TripObserver for TripAlerts {
    fn on_trip(&self, event: &TripEvent) {
        let alert = AlertRecord::new(
            &event.model,
            AlertSeverity::Warning,
            AlertKind::InstanceDeactivated,
            &format!(
                "instance {} removed from rotation at {:.0}% errors over {} requests",
                event.instance,
                event.error_rate * 100.0,
                event.requests
            ),
        )
        .with_recommendation("Inspect the instance backend, then activate it again once stable")
        .with_metadata(serde_json::json!({
            "instance": event.instance.to_string(),
            "error_rate": event.error_rate,
            "requests": event.requests,
        }));
        self.metrics
            .record_alert(&alert.kind.to_string(), &alert.severity.to_string());
        if let Err(e) = self.alerts.raise(alert) {
            warn!("Could not persist trip alert for {}: {}", event.model, e);
        }
    }
}

pub struct AppContext {
    pub config: PlaneConfig,
    pub cache: Arc<TtlCache>,
    pub batch: Arc<BatchProcessor>,
    pub balancer: Arc<LoadBalancer>,
    pub pool: Arc<WorkerPool>,
    pub metrics: Metrics,
    pub windows: Arc<ServingWindow>,
    pub volume: Arc<VolumeTracker>,
    pub alerts: Arc<AlertManager>,
    pub monitor: Arc<ModelMonitor>,
    pub registry: Arc<ModelRegistry>,
    pub optimizer: Arc<PerformanceOptimizer>,
    store: Arc<dyn TtlStore>,
    tasks: Mutex<TaskManager>,
    started: Instant,
}

impl AppContext {
    pub fn new(
        config: PlaneConfig,
        store: Arc<dyn TtlStore>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Arc<Self> {
        let cache = Arc::new(TtlCache::new(&config.cache));
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            name: "serving".to_string(),
            workers: config.batch.worker_threads,
            ..WorkerPoolConfig::default()
        }));
        let batch = Arc::new(BatchProcessor::new(config.batch.clone()).with_pool(pool.clone()));
        let balancer = Arc::new(LoadBalancer::new(config.balancer.clone()));
        let metrics = Metrics::new();
        let windows = Arc::new(ServingWindow::new(config.monitor.window_capacity));
        let volume = Arc::new(VolumeTracker::new());
        let alerts = Arc::new(AlertManager::new(
            SnapshotManager::new(store.clone()),
            config.alerts.clone(),
        ));
        balancer.set_trip_observer(Arc::new(TripAlerts {
            alerts: alerts.clone(),
            metrics: metrics.clone(),
        }));
        let monitor = Arc::new(
            ModelMonitor::new(
                config.monitor.clone(),
                config.drift.clone(),
                windows.clone(),
                volume.clone(),
                alerts.clone(),
                SnapshotManager::new(store.clone()),
            )
            .with_pool(pool.clone()),
        );
        let registry = Arc::new(ModelRegistry::new(
            config.registry.clone(),
            SnapshotManager::new(store.clone()),
            artifacts,
        ));
        let optimizer = Arc::new(PerformanceOptimizer::new(
            cache.clone(),
            batch.clone(),
            balancer.clone(),
            metrics.clone(),
        ));

        Arc::new(Self {
            config,
            cache,
            batch,
            balancer,
            pool,
            metrics,
            windows,
            volume,
            alerts,
            monitor,
            registry,
            optimizer,
            store,
            tasks: Mutex::new(TaskManager::new()),
            started: Instant::now(),
        })
    }

    /// Restores registry and alert state from the snapshot store. Failures
    /// are logged and the plane starts empty rather than refusing to boot.
    pub async fn recover(&self) {
        match self.registry.recover().await {
            Ok(count) if count > 0 => info!("Recovered {} registered models", count),
            Ok(_) => {}
            Err(e) => warn!("Registry recovery failed: {}", e),
        }
        match self.alerts.recover() {
            Ok(count) if count > 0 => info!("Recovered {} alerts", count),
            Ok(_) => {}
            Err(e) => warn!("Alert recovery failed: {}", e),
        }
    }

    /// Serves one prediction and feeds the monitoring windows.
    pub async fn predict(
        &self,
        model: &str,
        request: FeatureVector,
    ) -> Result<OptimizedResponse, ControlError> {
        let handle = self.registry.get(model)?;
        let response = self.optimizer.optimize_single(model, &handle, &request).await?;
        self.windows.record(model, &request, response.prediction);
        self.volume.record(model);
        Ok(response)
    }

    /// Serves a batch. Only items that produced a prediction count toward
    /// the monitoring windows.
    pub async fn predict_batch(
        &self,
        model: &str,
        requests: Vec<FeatureVector>,
    ) -> Result<BatchResponse, ControlError> {
        let handle = self.registry.get(model)?;
        let response = self
            .optimizer
            .optimize_batch(model, &handle, requests.clone())
            .await;
        for (request, item) in requests.iter().zip(&response.results) {
            if let Some(prediction) = item.prediction {
                self.windows.record(model, request, prediction);
                self.volume.record(model);
            }
        }
        Ok(response)
    }

    /// Runs a fresh health pass for one model.
    pub async fn model_health(&self, name: &str) -> Result<HealthReport, ControlError> {
        let target = self
            .registry
            .monitor_target(name)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;
        let report = self.monitor.run(&target).await;
        self.record_report(&report);
        Ok(report)
    }

    /// One scheduled monitoring sweep over every registered model.
    pub async fn run_monitor_pass(&self) -> usize {
        let names = self.registry.names();
        let mut covered = 0;
        for name in &names {
            if let Some(target) = self.registry.monitor_target(name) {
                let report = self.monitor.run(&target).await;
                self.record_report(&report);
                covered += 1;
            }
        }
        debug!("Monitor pass covered {} models", covered);
        covered
    }

    fn record_report(&self, report: &HealthReport) {
        self.metrics.set_health_score(&report.model, report.health_score);
        for alert in &report.alerts {
            self.metrics
                .record_alert(&alert.kind.to_string(), &alert.severity.to_string());
        }
        if report.overall_health != HealthStatus::Healthy {
            info!(
                "Model {} health {} (score {:.2})",
                report.model, report.overall_health, report.health_score
            );
        }
    }

    /// Starts the maintenance loops: monitoring, cache tuning, alert
    /// pruning, and the staleness sweep.
    pub fn spawn_background(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        let ctx = self.clone();
        tasks.spawn(
            "model-monitor",
            Duration::from_secs(self.config.monitor.interval_secs),
            move || {
                let ctx = ctx.clone();
                async move {
                    ctx.run_monitor_pass().await;
                }
            },
        );

        let ctx = self.clone();
        tasks.spawn(
            "cache-tune",
            Duration::from_secs(self.config.cache.auto_tune.interval_secs),
            move || {
                let ctx = ctx.clone();
                async move {
                    let report = ctx.optimizer.auto_tune();
                    debug!(
                        "Tune pass: hit rate {:.2}, chunk size {}",
                        report.hit_rate, report.chunk_size
                    );
                }
            },
        );

        let ctx = self.clone();
        tasks.spawn(
            "alert-prune",
            Duration::from_secs(self.config.alerts.prune_interval_secs),
            move || {
                let ctx = ctx.clone();
                async move {
                    match ctx.alerts.prune() {
                        Ok(0) => {}
                        Ok(count) => info!("Pruned {} expired alerts", count),
                        Err(e) => warn!("Alert prune failed: {}", e),
                    }
                }
            },
        );

        let ctx = self.clone();
        tasks.spawn(
            "staleness-sweep",
            Duration::from_secs(self.config.registry.sweep_interval_secs),
            move || {
                let ctx = ctx.clone();
                async move {
                    ctx.registry.sweep_stale();
                }
            },
        );
    }

    pub fn background_tasks(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.task_names().iter().map(|s| s.to_string()).collect()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Stops the maintenance loops and flushes the state store.
    pub fn shutdown(&self) {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.stop_all();
        }
        if let Err(e) = self.store.flush() {
            warn!("Could not flush state store on shutdown: {}", e);
        }
        info!("Control plane stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::StaticArtifactSource;
    use perkon_core::model::{InstanceId, ModelInstance, ModelMetadata};
    use perkon_serving::predictor::HeuristicPredictor;
    use perkon_serving::store::MemoryStore;

    fn context() -> Arc<AppContext> {
        AppContext::new(
            PlaneConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticArtifactSource::new()),
        )
    }

    fn request(pairs: &[(&str, f64)]) -> FeatureVector {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn register_model(ctx: &AppContext, name: &str) {
        let metadata = ModelMetadata::new(name, "1.0.0", "regression", vec!["x".into()]);
        ctx.registry
            .register(metadata, Arc::new(HeuristicPredictor::new()))
            .unwrap();
    }

    #[tokio::test]
    async fn test_predict_feeds_monitoring_state() {
        let ctx = context();
        register_model(&ctx, "churn");

        let response = ctx.predict("churn", request(&[("x", 2.0)])).await.unwrap();
        assert!(!response.metadata.cache_hit);
        assert_eq!(ctx.windows.sample_count("churn"), 1);
        assert_eq!(ctx.volume.count("churn"), 1);

        // An identical request comes from cache but still counts as served.
        let cached = ctx.predict("churn", request(&[("x", 2.0)])).await.unwrap();
        assert!(cached.metadata.cache_hit);
        assert_eq!(cached.prediction, response.prediction);
        assert_eq!(ctx.volume.count("churn"), 2);
    }

    #[tokio::test]
    async fn test_predict_unknown_model_errors() {
        let ctx = context();
        let err = ctx
            .predict("ghost", request(&[("x", 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Registry(RegistryError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_results_feed_windows_in_request_order() {
        let ctx = context();
        register_model(&ctx, "churn");

        let requests = vec![
            request(&[("x", 1.0)]),
            request(&[("x", 2.0)]),
            request(&[("x", 3.0)]),
        ];
        let response = ctx.predict_batch("churn", requests).await.unwrap();
        assert_eq!(response.results.len(), 3);
        assert!(response.results.iter().all(|r| r.prediction.is_some()));
        assert_eq!(response.cache_hits, 0);
        assert_eq!(ctx.windows.sample_count("churn"), 3);
        assert_eq!(ctx.volume.count("churn"), 3);
    }

    #[tokio::test]
    async fn test_on_demand_health_runs_and_is_retained() {
        let ctx = context();
        register_model(&ctx, "churn");

        let report = ctx.model_health("churn").await.unwrap();
        assert_eq!(report.overall_health, HealthStatus::Healthy);
        assert!(ctx.monitor.latest("churn").is_some());

        let err = ctx.model_health("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Registry(RegistryError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn test_monitor_pass_covers_registered_models() {
        let ctx = context();
        register_model(&ctx, "churn");
        register_model(&ctx, "ctr");

        assert_eq!(ctx.run_monitor_pass().await, 2);
        assert!(ctx.monitor.latest("churn").is_some());
        assert!(ctx.monitor.latest("ctr").is_some());
    }

    #[tokio::test]
    async fn test_instance_trip_raises_alert() {
        let ctx = context();
        register_model(&ctx, "churn");
        let id = InstanceId("i-1".to_string());
        ctx.balancer
            .add_instance("churn", ModelInstance::new(id.clone(), "http://backend-1", 1.0));

        for _ in 0..12 {
            ctx.balancer
                .record_result("churn", &id, 40.0, false)
                .unwrap();
        }

        let active = ctx.alerts.active(Some("churn"), None);
        assert!(
            active.iter().any(|a| a.kind == AlertKind::InstanceDeactivated),
            "expected a deactivation alert, got {:?}",
            active.iter().map(|a| a.kind).collect::<Vec<_>>()
        );
        assert_eq!(ctx.balancer.active_count("churn"), 0);
    }

    #[tokio::test]
    async fn test_background_tasks_lifecycle() {
        let ctx = context();
        ctx.spawn_background();
        let names = ctx.background_tasks();
        assert_eq!(names.len(), 4, "tasks: {:?}", names);
        assert!(names.contains(&"model-monitor".to_string()));

        ctx.shutdown();
        assert!(ctx.background_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_restores_registry_across_contexts() {
        let store = Arc::new(MemoryStore::new());
        let artifacts = Arc::new(StaticArtifactSource::new());
        artifacts.insert("churn", "1.0.0", Arc::new(HeuristicPredictor::new()));

        let first = AppContext::new(PlaneConfig::default(), store.clone(), artifacts.clone());
        register_model(&first, "churn");

        let second = AppContext::new(PlaneConfig::default(), store, artifacts);
        second.recover().await;
        assert!(second.registry.get("churn").is_ok());
    }
}
