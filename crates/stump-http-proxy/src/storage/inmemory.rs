//! In-memory implementation of the data-access boundary.
//!
//! Suitable for tests, development, and embedding the engine in a process
//! that does not need durable state.

use super::DataAccess;
use crate::config::ProxyServerConfig;
use crate::error::{EngineError, EngineResult};
use crate::stump::StumpDefinition;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct StoreState {
    configs: HashMap<String, ProxyServerConfig>,
    stumps: HashMap<String, Vec<StumpDefinition>>,
    payloads: HashMap<String, Vec<u8>>,
}

/// Everything behind one mutex; contention on the persistence path is
/// dwarfed by the network work around it.
#[derive(Default)]
pub struct InMemoryDataAccess {
    state: Mutex<StoreState>,
}

impl InMemoryDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    fn match_key(host_key: &str, stump_id: &str) -> String {
        format!("{host_key}/{stump_id}.match")
    }

    fn response_key(host_key: &str, stump_id: &str) -> String {
        format!("{host_key}/{stump_id}.response")
    }
}

impl DataAccess for InMemoryDataAccess {
    fn create_proxy_config(&self, config: &ProxyServerConfig) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.configs.contains_key(&config.id) {
            return Err(EngineError::Storage(format!(
                "configuration `{}` already exists",
                config.id
            )));
        }
        state.configs.insert(config.id.clone(), config.clone());
        Ok(())
    }

    fn delete_proxy_config(&self, id: &str) -> EngineResult<()> {
        self.state.lock().configs.remove(id);
        Ok(())
    }

    fn find_all_proxy_configs(&self) -> EngineResult<Vec<ProxyServerConfig>> {
        Ok(self.state.lock().configs.values().cloned().collect())
    }

    fn create_stump(
        &self,
        host_key: &str,
        stump: &StumpDefinition,
        match_body: Option<&[u8]>,
        response_body: Option<&[u8]>,
    ) -> EngineResult<StumpDefinition> {
        let mut stored = stump.clone();
        let mut state = self.state.lock();

        if let Some(payload) = match_body {
            let key = Self::match_key(host_key, &stored.id);
            state.payloads.insert(key.clone(), payload.to_vec());
            stored.match_body_resource = Some(key);
        }
        if let Some(payload) = response_body {
            let key = Self::response_key(host_key, &stored.id);
            state.payloads.insert(key.clone(), payload.to_vec());
            if let Some(first) = stored.responses.first_mut() {
                first.body_resource = Some(key);
            }
        }

        state
            .stumps
            .entry(host_key.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn delete_stump(&self, host_key: &str, stump_id: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        if let Some(stumps) = state.stumps.get_mut(host_key) {
            stumps.retain(|s| s.id != stump_id);
        }
        state.payloads.remove(&Self::match_key(host_key, stump_id));
        state
            .payloads
            .remove(&Self::response_key(host_key, stump_id));
        Ok(())
    }

    fn find_all_stumps(&self, host_key: &str) -> EngineResult<Vec<StumpDefinition>> {
        let state = self.state.lock();
        let mut stumps = state.stumps.get(host_key).cloned().unwrap_or_default();
        for stump in &mut stumps {
            for response in &mut stump.responses {
                if response.body.is_empty() {
                    if let Some(ref resource) = response.body_resource {
                        if let Some(payload) = state.payloads.get(resource) {
                            response.body = payload.clone();
                        }
                    }
                }
            }
        }
        Ok(stumps)
    }
}
