//! Perkon Serving - Request-path machinery for the serving plane
//!
//! This crate provides the caching, batching, routing, and prediction
//! backends the control plane composes into the serving path.

pub mod balancer;
pub mod batch;
pub mod cache;
pub mod metrics;
pub mod optimizer;
pub mod pool;
pub mod predictor;
pub mod store;
pub mod timer;

pub use balancer::{
    BalancerError, LeastLoadedStrategy, LoadBalancer, RoundRobinStrategy, RoutingStrategy,
    TripEvent, TripObserver, WeightedStrategy,
};
pub use batch::{BatchItemFailure, BatchOutcome, BatchProcessor, BatchStats, JobStatus};
pub use cache::{canonical_json, CacheStats, TtlCache, TuneAction};
pub use metrics::{Metrics, MetricsServer};
pub use optimizer::{
    BatchItem, BatchResponse, OptimizationMetadata, OptimizeError, OptimizedResponse,
    PerformanceOptimizer, TuneReport,
};
pub use pool::{PoolError, WorkerPool, WorkerPoolConfig};
pub use predictor::{HeuristicPredictor, HttpPredictor, PredictError, Predictor};
pub use store::{FileStore, MemoryStore, SnapshotManager, StoreError, TtlStore};
pub use timer::{spawn_interval, TaskManager};
