//! Instance routing with error-rate circuit breaking.
//!
//! The balancer keeps a per-model pool of deployed instances, routes each
//! request through a pluggable strategy, and takes instances out of rotation
//! when their observed error rate crosses the configured threshold.
//! Reactivation is always an explicit operation.

use perkon_core::config::{BalancerConfig, RoutingStrategyKind};
use perkon_core::model::{InstanceId, InstanceInfo, ModelInstance};
use rand::Rng;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error("no active instances for model {0}")]
    NoActiveInstances(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown instance {1} for model {0}")]
    UnknownInstance(String, String),
}

/// One routing decision over the current active set.
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picks one of the given active instances. `None` only when the slice
    /// is empty.
    fn select(&self, instances: &[&ModelInstance]) -> Option<InstanceId>;
}

/// Cycles through the active set in order.
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoutingStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, instances: &[&ModelInstance]) -> Option<InstanceId> {
        if instances.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
        Some(instances[idx].id.clone())
    }
}

/// Random choice proportional to instance weight.
#[derive(Default)]
pub struct WeightedStrategy;

impl RoutingStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select(&self, instances: &[&ModelInstance]) -> Option<InstanceId> {
        if instances.is_empty() {
            return None;
        }
        let total: f64 = instances.iter().map(|i| i.weight.max(0.0)).sum();
        if total <= 0.0 {
            return Some(instances[0].id.clone());
        }
        let mut remaining = rand::thread_rng().gen::<f64>() * total;
        for instance in instances {
            remaining -= instance.weight.max(0.0);
            if remaining <= 0.0 {
                return Some(instance.id.clone());
            }
        }
        Some(instances[instances.len() - 1].id.clone())
    }
}

/// Lowest running average latency wins.
#[derive(Default)]
pub struct LeastLoadedStrategy;

impl RoutingStrategy for LeastLoadedStrategy {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select(&self, instances: &[&ModelInstance]) -> Option<InstanceId> {
        instances
            .iter()
            .min_by(|a, b| {
                a.stats
                    .avg_latency_ms()
                    .partial_cmp(&b.stats.avg_latency_ms())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|i| i.id.clone())
    }
}

/// Emitted when the circuit breaker takes an instance out of rotation.
#[derive(Debug, Clone)]
pub struct TripEvent {
    pub model: String,
    pub instance: InstanceId,
    pub error_rate: f64,
    pub requests: u64,
}

/// Receives circuit-breaker trips, e.g. to raise an alert.
pub trait TripObserver: Send + Sync {
    fn on_trip(&self, event: &TripEvent);
}

struct ModelPool {
    instances: Vec<ModelInstance>,
    strategies: FxHashMap<RoutingStrategyKind, Box<dyn RoutingStrategy>>,
}

impl ModelPool {
    fn new() -> Self {
        let mut strategies: FxHashMap<RoutingStrategyKind, Box<dyn RoutingStrategy>> =
            FxHashMap::default();
        strategies.insert(
            RoutingStrategyKind::RoundRobin,
            Box::new(RoundRobinStrategy::default()),
        );
        strategies.insert(RoutingStrategyKind::Weighted, Box::new(WeightedStrategy));
        strategies.insert(
            RoutingStrategyKind::LeastLoaded,
            Box::new(LeastLoadedStrategy),
        );
        Self {
            instances: Vec::new(),
            strategies,
        }
    }

    fn strategy(&self, kind: RoutingStrategyKind) -> &dyn RoutingStrategy {
        self.strategies
            .get(&kind)
            .map(|s| s.as_ref())
            .unwrap_or(&LeastLoadedStrategy)
    }
}

pub struct LoadBalancer {
    config: BalancerConfig,
    pools: RwLock<FxHashMap<String, ModelPool>>,
    observer: RwLock<Option<Arc<dyn TripObserver>>>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(FxHashMap::default()),
            observer: RwLock::new(None),
        }
    }

    pub fn set_trip_observer(&self, observer: Arc<dyn TripObserver>) {
        let mut slot = self.observer.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(observer);
    }

    /// Adds an instance to the model's pool, replacing any instance with the
    /// same id.
    pub fn add_instance(&self, model: &str, instance: ModelInstance) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let pool = pools.entry(model.to_string()).or_insert_with(ModelPool::new);
        if let Some(existing) = pool.instances.iter_mut().find(|i| i.id == instance.id) {
            *existing = instance;
        } else {
            info!("Registered instance {} for model {}", instance.id, model);
            pool.instances.push(instance);
        }
    }

    pub fn remove_instance(&self, model: &str, id: &InstanceId) -> Result<(), BalancerError> {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get_mut(model)
            .ok_or_else(|| BalancerError::UnknownModel(model.to_string()))?;
        let before = pool.instances.len();
        pool.instances.retain(|i| &i.id != id);
        if pool.instances.len() == before {
            return Err(BalancerError::UnknownInstance(
                model.to_string(),
                id.to_string(),
            ));
        }
        Ok(())
    }

    pub fn remove_model(&self, model: &str) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        pools.remove(model);
    }

    /// Whether any instances are registered for the model, active or not.
    pub fn has_instances(&self, model: &str) -> bool {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(model).map(|p| !p.instances.is_empty()).unwrap_or(false)
    }

    pub fn active_count(&self, model: &str) -> usize {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools
            .get(model)
            .map(|p| p.instances.iter().filter(|i| i.active).count())
            .unwrap_or(0)
    }

    pub fn instances(&self, model: &str) -> Vec<InstanceInfo> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools
            .get(model)
            .map(|p| p.instances.iter().map(InstanceInfo::from).collect())
            .unwrap_or_default()
    }

    pub fn models(&self) -> Vec<String> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.keys().cloned().collect()
    }

    /// Selects an active instance using the given strategy (or the
    /// configured default).
    pub fn select(
        &self,
        model: &str,
        kind: Option<RoutingStrategyKind>,
    ) -> Result<ModelInstance, BalancerError> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get(model)
            .ok_or_else(|| BalancerError::NoActiveInstances(model.to_string()))?;
        let actives: Vec<&ModelInstance> = pool.instances.iter().filter(|i| i.active).collect();
        if actives.is_empty() {
            return Err(BalancerError::NoActiveInstances(model.to_string()));
        }
        let kind = kind.unwrap_or(self.config.default_strategy);
        let id = pool
            .strategy(kind)
            .select(&actives)
            .ok_or_else(|| BalancerError::NoActiveInstances(model.to_string()))?;
        actives
            .into_iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| BalancerError::NoActiveInstances(model.to_string()))
    }

    /// Records one request outcome against an instance. Returns `true` when
    /// this result tripped the circuit breaker.
    pub fn record_result(
        &self,
        model: &str,
        id: &InstanceId,
        latency_ms: f64,
        success: bool,
    ) -> Result<bool, BalancerError> {
        let trip = {
            let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
            let pool = pools
                .get_mut(model)
                .ok_or_else(|| BalancerError::UnknownModel(model.to_string()))?;
            let instance = pool
                .instances
                .iter_mut()
                .find(|i| &i.id == id)
                .ok_or_else(|| {
                    BalancerError::UnknownInstance(model.to_string(), id.to_string())
                })?;

            instance.stats.record(latency_ms, success);

            let rate = instance.stats.error_rate();
            if instance.active
                && instance.stats.requests >= self.config.min_requests_for_trip
                && rate > self.config.error_rate_threshold
            {
                instance.active = false;
                warn!(
                    "Instance {} of model {} deactivated: error rate {:.1}% over {} requests",
                    instance.id,
                    model,
                    rate * 100.0,
                    instance.stats.requests
                );
                Some(TripEvent {
                    model: model.to_string(),
                    instance: instance.id.clone(),
                    error_rate: rate,
                    requests: instance.stats.requests,
                })
            } else {
                None
            }
        };

        // Observer runs outside the pool lock.
        if let Some(event) = trip {
            let observer = self.observer.read().unwrap_or_else(|e| e.into_inner());
            if let Some(observer) = observer.as_ref() {
                observer.on_trip(&event);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Explicitly puts an instance back into rotation with a clean stat
    /// window, so it is not immediately re-tripped by old counts.
    pub fn activate(&self, model: &str, id: &InstanceId) -> Result<(), BalancerError> {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get_mut(model)
            .ok_or_else(|| BalancerError::UnknownModel(model.to_string()))?;
        let instance = pool
            .instances
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| BalancerError::UnknownInstance(model.to_string(), id.to_string()))?;
        instance.active = true;
        instance.stats = Default::default();
        info!("Instance {} of model {} reactivated", id, model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn balancer() -> LoadBalancer {
        LoadBalancer::new(BalancerConfig::default())
    }

    fn instance(id: &str, weight: f64) -> ModelInstance {
        ModelInstance::new(InstanceId(id.into()), &format!("http://{}:8501", id), weight)
    }

    #[test]
    fn test_round_robin_exact_distribution() {
        let lb = balancer();
        for id in ["a", "b", "c"] {
            lb.add_instance("churn", instance(id, 1.0));
        }

        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for _ in 0..12 {
            let picked = lb.select("churn", Some(RoutingStrategyKind::RoundRobin)).unwrap();
            *counts.entry(picked.id.0).or_insert(0) += 1;
        }
        for id in ["a", "b", "c"] {
            assert_eq!(counts[id], 4, "instance {} should get exactly 4 of 12", id);
        }
    }

    #[test]
    fn test_weighted_prefers_heavier_instances() {
        let lb = balancer();
        lb.add_instance("churn", instance("light", 1.0));
        lb.add_instance("churn", instance("heavy", 3.0));

        let mut heavy = 0;
        let n = 2000;
        for _ in 0..n {
            let picked = lb.select("churn", Some(RoutingStrategyKind::Weighted)).unwrap();
            if picked.id.0 == "heavy" {
                heavy += 1;
            }
        }
        let share = heavy as f64 / n as f64;
        assert!(
            (0.65..0.85).contains(&share),
            "expected ~75% heavy picks, got {:.2}",
            share
        );
    }

    #[test]
    fn test_least_loaded_picks_lowest_average_latency() {
        let lb = balancer();
        lb.add_instance("churn", instance("slow", 1.0));
        lb.add_instance("churn", instance("fast", 1.0));

        for _ in 0..5 {
            lb.record_result("churn", &InstanceId("slow".into()), 200.0, true)
                .unwrap();
            lb.record_result("churn", &InstanceId("fast".into()), 20.0, true)
                .unwrap();
        }

        let picked = lb
            .select("churn", Some(RoutingStrategyKind::LeastLoaded))
            .unwrap();
        assert_eq!(picked.id.0, "fast");
    }

    #[test]
    fn test_no_active_instances() {
        let lb = balancer();
        assert!(matches!(
            lb.select("ghost", None),
            Err(BalancerError::NoActiveInstances(_))
        ));

        lb.add_instance("churn", instance("a", 1.0));
        lb.remove_instance("churn", &InstanceId("a".into())).unwrap();
        assert!(matches!(
            lb.select("churn", None),
            Err(BalancerError::NoActiveInstances(_))
        ));
    }

    #[test]
    fn test_circuit_breaker_trips_and_excludes() {
        let lb = balancer();
        lb.add_instance("churn", instance("bad", 1.0));
        lb.add_instance("churn", instance("good", 1.0));

        // 10 requests with 2 failures: 20% error rate over the minimum sample.
        let mut tripped = false;
        for i in 0..10 {
            let success = i % 5 != 0;
            tripped |= lb
                .record_result("churn", &InstanceId("bad".into()), 50.0, success)
                .unwrap();
        }
        assert!(tripped, "20% error rate over 10 requests should trip");
        assert_eq!(lb.active_count("churn"), 1);

        for _ in 0..20 {
            let picked = lb.select("churn", None).unwrap();
            assert_eq!(picked.id.0, "good", "tripped instance must be excluded");
        }
    }

    #[test]
    fn test_no_trip_below_minimum_sample() {
        let lb = balancer();
        lb.add_instance("churn", instance("new", 1.0));

        // 100% errors but under the minimum request count.
        for _ in 0..5 {
            let tripped = lb
                .record_result("churn", &InstanceId("new".into()), 50.0, false)
                .unwrap();
            assert!(!tripped);
        }
        assert_eq!(lb.active_count("churn"), 1);
    }

    #[test]
    fn test_trip_notifies_observer() {
        struct Collector(Mutex<Vec<TripEvent>>);
        impl TripObserver for Collector {
            fn on_trip(&self, event: &TripEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }

        let lb = balancer();
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        lb.set_trip_observer(collector.clone());
        lb.add_instance("churn", instance("bad", 1.0));

        for _ in 0..12 {
            lb.record_result("churn", &InstanceId("bad".into()), 10.0, false)
                .unwrap();
        }

        let events = collector.0.lock().unwrap();
        assert_eq!(events.len(), 1, "breaker should trip exactly once");
        assert_eq!(events[0].model, "churn");
        assert!(events[0].error_rate > 0.1);
    }

    #[test]
    fn test_explicit_reactivation_resets_stats() {
        let lb = balancer();
        lb.add_instance("churn", instance("flaky", 1.0));
        for _ in 0..12 {
            lb.record_result("churn", &InstanceId("flaky".into()), 10.0, false)
                .unwrap();
        }
        assert_eq!(lb.active_count("churn"), 0);

        lb.activate("churn", &InstanceId("flaky".into())).unwrap();
        assert_eq!(lb.active_count("churn"), 1);

        let info = &lb.instances("churn")[0];
        assert_eq!(info.requests, 0, "reactivation should clear the stat window");
        assert!(info.active);

        // One more failure must not instantly re-trip.
        let tripped = lb
            .record_result("churn", &InstanceId("flaky".into()), 10.0, false)
            .unwrap();
        assert!(!tripped);
    }

    #[test]
    fn test_add_instance_replaces_same_id() {
        let lb = balancer();
        lb.add_instance("churn", instance("a", 1.0));
        lb.add_instance("churn", instance("a", 5.0));

        let infos = lb.instances("churn");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].weight, 5.0);
    }

    #[test]
    fn test_record_unknown_instance() {
        let lb = balancer();
        lb.add_instance("churn", instance("a", 1.0));
        let err = lb
            .record_result("churn", &InstanceId("zzz".into()), 1.0, true)
            .unwrap_err();
        assert!(matches!(err, BalancerError::UnknownInstance(_, _)));

        let err = lb
            .record_result("ghost", &InstanceId("a".into()), 1.0, true)
            .unwrap_err();
        assert!(matches!(err, BalancerError::UnknownModel(_)));
    }
}
