//! Control plane for the Perkon serving stack.
//!
//! Ties the registry, serving optimizer, and monitoring pipeline together
//! behind a warp REST API, and runs the background maintenance loops
//! (monitoring sweeps, cache tuning, alert pruning, staleness checks).

pub mod api;
pub mod artifact;
pub mod context;
pub mod registry;

pub use api::{control_routes, handle_rejection, SharedContext};
pub use artifact::{
    ArtifactError, ArtifactSource, HttpArtifactSource, LoadedArtifact, StaticArtifactSource,
};
pub use context::{AppContext, ControlError};
pub use registry::{ModelRegistry, ModelSummary, RegistryError};
