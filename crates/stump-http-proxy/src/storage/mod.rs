//! Persistence boundary consumed by the engine.
//!
//! The engine only depends on this trait; storage mechanics (layout,
//! format, location) belong to the implementation. Body byte payloads are
//! persisted as separate side-car artifacts referenced from the stump
//! record, never inline.

mod inmemory;

pub use inmemory::InMemoryDataAccess;

use crate::config::ProxyServerConfig;
use crate::error::EngineResult;
use crate::stump::StumpDefinition;

/// Data-access collaborator for proxy configurations and stumps.
pub trait DataAccess: Send + Sync {
    fn create_proxy_config(&self, config: &ProxyServerConfig) -> EngineResult<()>;

    /// Idempotent: deleting an unknown id succeeds.
    fn delete_proxy_config(&self, id: &str) -> EngineResult<()>;

    fn find_all_proxy_configs(&self) -> EngineResult<Vec<ProxyServerConfig>>;

    /// Persist a stump under `host_key`, storing the optional side-car
    /// payloads and returning the stump with its resource references set.
    fn create_stump(
        &self,
        host_key: &str,
        stump: &StumpDefinition,
        match_body: Option<&[u8]>,
        response_body: Option<&[u8]>,
    ) -> EngineResult<StumpDefinition>;

    /// Idempotent: deleting an unknown stump succeeds.
    fn delete_stump(&self, host_key: &str, stump_id: &str) -> EngineResult<()>;

    /// All stumps for a host, response bodies rehydrated from their
    /// side-car payloads.
    fn find_all_stumps(&self, host_key: &str) -> EngineResult<Vec<StumpDefinition>>;
}
