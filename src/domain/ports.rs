//! Ports: interfaces the core depends on, implemented by adapters.

use async_trait::async_trait;

use super::errors::DomainResult;
use super::models::SharedState;

/// Persistence port for the shared state aggregate.
///
/// The store owns durability only; serialization of concurrent writers is
/// the coordinator's job. `save` is all-or-nothing: either every
/// collection is replaced or none is.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the full aggregate. Succeeds on an empty store by returning a
    /// fresh aggregate with counters = 1, and always self-heals counters
    /// against the ids actually present.
    async fn load(&self) -> DomainResult<SharedState>;

    /// Atomically replace all persisted collections.
    async fn save(&self, state: &SharedState) -> DomainResult<()>;

    /// Release underlying resources.
    async fn close(&self);
}
