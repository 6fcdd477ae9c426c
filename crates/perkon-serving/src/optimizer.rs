//! Serving-path composition: cache lookup, instance routing, invocation,
//! result recording, and cache fill.
//!
//! Single predictions go cache -> balancer -> predictor. Batches partition
//! into cache hits and misses, run the misses through the chunked batch
//! processor, and merge back in request order.

use crate::balancer::{BalancerError, LoadBalancer};
use crate::batch::BatchProcessor;
use crate::cache::{CacheStats, TtlCache, TuneAction};
use crate::metrics::Metrics;
use crate::predictor::{PredictError, Predictor};
use perkon_core::config::CacheNamespace;
use perkon_core::FeatureVector;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("no active instances for model {0}")]
    NoActiveInstances(String),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

/// How a single prediction was served.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationMetadata {
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub latency_ms: f64,
    pub optimizations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizedResponse {
    pub prediction: f64,
    pub metadata: OptimizationMetadata,
}

/// One position in a batch response, aligned to the request order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cache_hit: bool,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub job_id: String,
    pub results: Vec<BatchItem>,
    pub cache_hits: usize,
    pub latency_ms: f64,
}

/// Outcome of one auto-tune pass.
#[derive(Debug, Serialize)]
pub struct TuneReport {
    pub hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_action: Option<String>,
    pub chunk_size: usize,
    pub cache_entries: usize,
}

pub struct PerformanceOptimizer {
    cache: Arc<TtlCache>,
    batch: Arc<BatchProcessor>,
    balancer: Arc<LoadBalancer>,
    metrics: Metrics,
}

impl PerformanceOptimizer {
    pub fn new(
        cache: Arc<TtlCache>,
        batch: Arc<BatchProcessor>,
        balancer: Arc<LoadBalancer>,
        metrics: Metrics,
    ) -> Self {
        Self {
            cache,
            batch,
            balancer,
            metrics,
        }
    }

    fn prediction_key(&self, model: &str, request: &FeatureVector) -> Option<String> {
        match serde_json::to_value(request) {
            Ok(payload) => Some(TtlCache::key(CacheNamespace::Prediction, model, &payload)),
            Err(e) => {
                warn!("Uncacheable prediction request for {}: {}", model, e);
                self.cache.record_error();
                None
            }
        }
    }

    async fn invoke(
        &self,
        predictor: &Arc<dyn Predictor>,
        request: &FeatureVector,
    ) -> Result<f64, PredictError> {
        let predictions = predictor.predict(std::slice::from_ref(request)).await?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| PredictError::Backend("empty prediction batch".into()))
    }

    /// Serves a single prediction through the optimized path.
    pub async fn optimize_single(
        &self,
        model: &str,
        predictor: &Arc<dyn Predictor>,
        request: &FeatureVector,
    ) -> Result<OptimizedResponse, OptimizeError> {
        let started = Instant::now();
        let key = self.prediction_key(model, request);

        if let Some(key) = key.as_deref() {
            if let Some(prediction) = self.cache.get(key).and_then(|v| v.as_f64()) {
                self.metrics.record_cache("prediction", true);
                return Ok(OptimizedResponse {
                    prediction,
                    metadata: OptimizationMetadata {
                        cache_hit: true,
                        instance_id: None,
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        optimizations: vec!["cache".to_string()],
                    },
                });
            }
        }
        self.metrics.record_cache("prediction", false);

        // With no registered deployment the handle is invoked directly; with
        // deployments the balancer must yield an active instance.
        let instance = if self.balancer.has_instances(model) {
            let picked = self.balancer.select(model, None).map_err(|e| match e {
                BalancerError::NoActiveInstances(m) => OptimizeError::NoActiveInstances(m),
                other => OptimizeError::NoActiveInstances(other.to_string()),
            })?;
            Some(picked)
        } else {
            None
        };

        let call_started = Instant::now();
        let result = self.invoke(predictor, request).await;
        let call_ms = call_started.elapsed().as_secs_f64() * 1000.0;

        if let Some(instance) = &instance {
            if let Err(e) = self
                .balancer
                .record_result(model, &instance.id, call_ms, result.is_ok())
            {
                debug!("Could not record result for {}: {}", instance.id, e);
            }
        }

        let prediction = match result {
            Ok(prediction) => prediction,
            Err(e) => {
                self.metrics
                    .record_prediction(model, started.elapsed().as_secs_f64(), false);
                return Err(e.into());
            }
        };

        if let Some(key) = key.as_deref() {
            self.cache
                .set(CacheNamespace::Prediction, key, serde_json::json!(prediction));
        }
        self.metrics
            .record_prediction(model, started.elapsed().as_secs_f64(), true);

        let optimizations = if instance.is_some() {
            vec!["load_balanced".to_string()]
        } else {
            vec!["fallback_direct".to_string()]
        };
        Ok(OptimizedResponse {
            prediction,
            metadata: OptimizationMetadata {
                cache_hit: false,
                instance_id: instance.map(|i| i.id.0),
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                optimizations,
            },
        })
    }

    /// Serves a batch: cache hits short-circuit, misses run chunked through
    /// the batch processor, and results come back in request order.
    pub async fn optimize_batch(
        &self,
        model: &str,
        predictor: &Arc<dyn Predictor>,
        requests: Vec<FeatureVector>,
    ) -> BatchResponse {
        let started = Instant::now();
        let total = requests.len();

        let mut keys: Vec<Option<String>> = Vec::with_capacity(total);
        let mut slots: Vec<Option<BatchItem>> = (0..total).map(|_| None).collect();
        let mut misses: Vec<(usize, FeatureVector)> = Vec::new();
        let mut cache_hits = 0;

        for (index, request) in requests.into_iter().enumerate() {
            let key = self.prediction_key(model, &request);
            let cached = key
                .as_deref()
                .and_then(|k| self.cache.get(k))
                .and_then(|v| v.as_f64());
            self.metrics.record_cache("prediction", cached.is_some());
            if let Some(prediction) = cached {
                cache_hits += 1;
                slots[index] = Some(BatchItem {
                    prediction: Some(prediction),
                    error: None,
                    cache_hit: true,
                });
            } else {
                misses.push((index, request));
            }
            keys.push(key);
        }

        let (miss_indices, miss_inputs): (Vec<usize>, Vec<FeatureVector>) =
            misses.into_iter().unzip();

        let balancer = self.balancer.clone();
        let chunk_predictor = predictor.clone();
        let model_name = model.to_string();
        let outcome = self
            .batch
            .process(miss_inputs, move |chunk: Vec<FeatureVector>| {
                let balancer = balancer.clone();
                let predictor = chunk_predictor.clone();
                let model_name = model_name.clone();
                async move {
                    let instance = if balancer.has_instances(&model_name) {
                        match balancer.select(&model_name, None) {
                            Ok(instance) => Some(instance),
                            Err(e) => return Err(e.to_string()),
                        }
                    } else {
                        None
                    };
                    let call_started = Instant::now();
                    let result = predictor.predict(&chunk).await;
                    if let Some(instance) = &instance {
                        let call_ms = call_started.elapsed().as_secs_f64() * 1000.0;
                        if let Err(e) = balancer.record_result(
                            &model_name,
                            &instance.id,
                            call_ms,
                            result.is_ok(),
                        ) {
                            debug!("Could not record result for {}: {}", instance.id, e);
                        }
                    }
                    result.map_err(|e| e.to_string())
                }
            })
            .await;

        let miss_count = outcome.results.len().max(1);
        let per_item_secs = outcome.elapsed.as_secs_f64() / miss_count as f64;
        for (position, result) in outcome.results.into_iter().enumerate() {
            let index = miss_indices[position];
            match result {
                Ok(prediction) => {
                    if let Some(key) = keys[index].as_deref() {
                        self.cache.set(
                            CacheNamespace::Prediction,
                            key,
                            serde_json::json!(prediction),
                        );
                    }
                    self.metrics.record_prediction(model, per_item_secs, true);
                    slots[index] = Some(BatchItem {
                        prediction: Some(prediction),
                        error: None,
                        cache_hit: false,
                    });
                }
                Err(failure) => {
                    self.metrics.record_prediction(model, per_item_secs, false);
                    slots[index] = Some(BatchItem {
                        prediction: None,
                        error: Some(failure.error),
                        cache_hit: false,
                    });
                }
            }
        }

        self.metrics
            .record_batch(model, started.elapsed().as_secs_f64());

        let results: Vec<BatchItem> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| BatchItem {
                    prediction: None,
                    error: Some("missing result".to_string()),
                    cache_hit: false,
                })
            })
            .collect();

        BatchResponse {
            job_id: outcome.job_id,
            results,
            cache_hits,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// One tuning pass over cache TTLs and chunk sizing, driven by the
    /// observed hit rate.
    pub fn auto_tune(&self) -> TuneReport {
        let hit_rate = self.cache.hit_rate();
        let action = self.cache.auto_tune();

        // Poor reuse also means larger chunks amortize backend calls better.
        if action == Some(TuneAction::Grew) {
            let grown = (self.batch.current_chunk_size() as f64
                * self.batch.config().grow_factor)
                .round() as usize;
            self.batch.set_chunk_size(grown);
            info!(
                "Auto-tune grew batch chunk size to {}",
                self.batch.current_chunk_size()
            );
        }

        let stats = self.cache.stats();
        self.metrics.set_cache_entries(stats.entries);
        for model in self.balancer.models() {
            self.metrics
                .set_active_instances(&model, self.balancer.active_count(&model));
        }

        TuneReport {
            hit_rate,
            cache_action: action.map(|a| {
                match a {
                    TuneAction::Shrunk => "ttl_shrunk",
                    TuneAction::Grew => "ttl_grown",
                }
                .to_string()
            }),
            chunk_size: self.batch.current_chunk_size(),
            cache_entries: stats.entries,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::HeuristicPredictor;
    use perkon_core::config::{BalancerConfig, BatchConfig, CacheConfig};
    use perkon_core::model::{InstanceId, ModelInstance};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingPredictor {
        calls: AtomicU64,
        fail: bool,
    }

    impl CountingPredictor {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl Predictor for CountingPredictor {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn predict(&self, inputs: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PredictError::Backend("forced failure".into()));
            }
            Ok(inputs
                .iter()
                .map(|fv| fv.values().sum::<f64>())
                .collect())
        }
    }

    fn optimizer() -> PerformanceOptimizer {
        PerformanceOptimizer::new(
            Arc::new(TtlCache::new(&CacheConfig::default())),
            Arc::new(BatchProcessor::new(BatchConfig::default())),
            Arc::new(LoadBalancer::new(BalancerConfig::default())),
            Metrics::new(),
        )
    }

    fn features(pairs: &[(&str, f64)]) -> FeatureVector {
        let mut fv = FeatureVector::default();
        for (name, value) in pairs {
            fv.insert(name.to_string(), *value);
        }
        fv
    }

    #[tokio::test]
    async fn test_second_identical_request_hits_cache() {
        let opt = optimizer();
        let counting = Arc::new(CountingPredictor::new(false));
        let predictor: Arc<dyn Predictor> = counting.clone();
        let request = features(&[("age", 30.0), ("income", 50.0)]);

        let first = opt.optimize_single("churn", &predictor, &request).await.unwrap();
        assert!(!first.metadata.cache_hit);
        assert_eq!(first.prediction, 80.0);

        let second = opt.optimize_single("churn", &predictor, &request).await.unwrap();
        assert!(second.metadata.cache_hit);
        assert_eq!(second.prediction, first.prediction);
        assert_eq!(second.metadata.optimizations, vec!["cache".to_string()]);

        // Backend must have been called exactly once.
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_direct_fallback_without_instances() {
        let opt = optimizer();
        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());
        let request = features(&[("a", 4.0), ("b", 6.0)]);

        let response = opt.optimize_single("churn", &predictor, &request).await.unwrap();
        assert_eq!(response.prediction, 5.0);
        assert!(response.metadata.instance_id.is_none());
        assert_eq!(
            response.metadata.optimizations,
            vec!["fallback_direct".to_string()]
        );
    }

    #[tokio::test]
    async fn test_routed_prediction_records_instance() {
        let opt = optimizer();
        opt.balancer.add_instance(
            "churn",
            ModelInstance::new(InstanceId("i-1".into()), "http://h:8501", 1.0),
        );
        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());
        let request = features(&[("a", 2.0)]);

        let response = opt.optimize_single("churn", &predictor, &request).await.unwrap();
        assert_eq!(response.metadata.instance_id.as_deref(), Some("i-1"));
        assert_eq!(
            response.metadata.optimizations,
            vec!["load_balanced".to_string()]
        );

        let info = &opt.balancer.instances("churn")[0];
        assert_eq!(info.requests, 1);
    }

    #[tokio::test]
    async fn test_all_instances_tripped_propagates() {
        let opt = optimizer();
        opt.balancer.add_instance(
            "churn",
            ModelInstance::new(InstanceId("i-1".into()), "http://h:8501", 1.0),
        );
        for _ in 0..12 {
            opt.balancer
                .record_result("churn", &InstanceId("i-1".into()), 5.0, false)
                .unwrap();
        }

        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());
        let err = opt
            .optimize_single("churn", &predictor, &features(&[("a", 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::NoActiveInstances(_)));
    }

    #[tokio::test]
    async fn test_failed_prediction_not_cached() {
        let opt = optimizer();
        let failing: Arc<dyn Predictor> = Arc::new(CountingPredictor::new(true));
        let request = features(&[("a", 1.0)]);

        let err = opt.optimize_single("churn", &failing, &request).await;
        assert!(err.is_err());

        // A later request with a working predictor must miss the cache.
        let working: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());
        let response = opt.optimize_single("churn", &working, &request).await.unwrap();
        assert!(!response.metadata.cache_hit);
    }

    #[tokio::test]
    async fn test_batch_merges_hits_and_misses_in_order() {
        let opt = optimizer();
        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());

        // Warm the cache with the request that will sit at index 1.
        let warm = features(&[("v", 10.0)]);
        opt.optimize_single("churn", &predictor, &warm).await.unwrap();

        let requests = vec![
            features(&[("v", 1.0)]),
            features(&[("v", 10.0)]),
            features(&[("v", 3.0)]),
        ];
        let response = opt.optimize_batch("churn", &predictor, requests).await;

        assert_eq!(response.cache_hits, 1);
        assert_eq!(response.results.len(), 3);
        assert!(!response.results[0].cache_hit);
        assert!(response.results[1].cache_hit);
        assert!(!response.results[2].cache_hit);
        assert_eq!(response.results[0].prediction, Some(1.0));
        assert_eq!(response.results[1].prediction, Some(10.0));
        assert_eq!(response.results[2].prediction, Some(3.0));
    }

    #[tokio::test]
    async fn test_batch_all_hits_skips_backend() {
        let opt = optimizer();
        let counting = Arc::new(CountingPredictor::new(false));
        let predictor: Arc<dyn Predictor> = counting.clone();
        let request = features(&[("v", 2.0)]);

        opt.optimize_single("churn", &predictor, &request).await.unwrap();
        let before = counting.calls.load(Ordering::SeqCst);

        let response = opt
            .optimize_batch("churn", &predictor, vec![request.clone(), request.clone()])
            .await;
        assert_eq!(response.cache_hits, 2);
        assert_eq!(counting.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_batch_failure_isolated_per_item() {
        let opt = optimizer();
        let failing: Arc<dyn Predictor> = Arc::new(CountingPredictor::new(true));

        let response = opt
            .optimize_batch(
                "churn",
                &failing,
                vec![features(&[("v", 1.0)]), features(&[("v", 2.0)])],
            )
            .await;
        assert_eq!(response.cache_hits, 0);
        for item in &response.results {
            assert!(item.prediction.is_none());
            assert!(item.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_auto_tune_grows_chunks_on_low_hit_rate() {
        let opt = optimizer();
        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new());
        opt.batch.set_chunk_size(50);

        // All distinct requests: 0% hit rate.
        for i in 0..20 {
            let request = features(&[("v", i as f64)]);
            opt.optimize_single("churn", &predictor, &request).await.unwrap();
        }

        let report = opt.auto_tune();
        assert_eq!(report.cache_action.as_deref(), Some("ttl_grown"));
        assert_eq!(report.chunk_size, 60, "50 * 1.2 = 60");
    }
}
