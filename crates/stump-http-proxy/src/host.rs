//! The proxy host: registry and lifecycle owner for all server instances.

use crate::config::ProxyServerConfig;
use crate::error::{EngineError, EngineResult};
use crate::instance::ProxyServerInstance;
use crate::logging::EventLog;
use crate::storage::DataAccess;
use crate::stump::{IdGenerator, RandomIdGenerator};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;

/// Registry of proxy server instances keyed by id. Owns port allocation,
/// instance lifecycle, and the bridge to the persistence collaborator.
pub struct ProxyHost {
    instances: RwLock<HashMap<String, Arc<ProxyServerInstance>>>,
    data_access: Arc<dyn DataAccess>,
    id_generator: Arc<dyn IdGenerator>,
    log: Arc<dyn EventLog>,
}

impl ProxyHost {
    pub fn new(data_access: Arc<dyn DataAccess>, log: Arc<dyn EventLog>) -> Self {
        Self::with_id_generator(data_access, Arc::new(RandomIdGenerator::new()), log)
    }

    pub fn with_id_generator(
        data_access: Arc<dyn DataAccess>,
        id_generator: Arc<dyn IdGenerator>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            data_access,
            id_generator,
            log,
        }
    }

    /// Create (and optionally start) an instance for one external host.
    ///
    /// Fails `InvalidArgument` on an empty host name or an out-of-range
    /// port, and `PortInUse` when any process already holds the port. The
    /// availability probe is a transient bind; there is no retry.
    pub async fn create_server_instance(
        &self,
        external_host_name: &str,
        port: u16,
        use_ssl: bool,
        auto_start: bool,
    ) -> EngineResult<Arc<ProxyServerInstance>> {
        if external_host_name.is_empty() {
            return Err(EngineError::invalid_argument(
                "external_host_name",
                "external host name must not be empty",
            ));
        }
        if port == 0 {
            return Err(EngineError::invalid_argument(
                "port",
                "port must be within the valid TCP range",
            ));
        }
        self.probe_port(port)?;

        let config = ProxyServerConfig {
            id: self.id_generator.generate(),
            external_host_name: external_host_name.to_string(),
            port,
            use_ssl,
            auto_start,
        };
        self.data_access.create_proxy_config(&config)?;

        let instance = Arc::new(ProxyServerInstance::new(
            config,
            Arc::clone(&self.data_access),
            Arc::clone(&self.id_generator),
            Arc::clone(&self.log),
        )?);
        if auto_start {
            instance.start().await?;
        }

        self.instances
            .write()
            .insert(instance.id().to_string(), Arc::clone(&instance));
        self.log.info(&format!(
            "instance `{}` created for {} on port {}",
            instance.id(),
            external_host_name,
            port
        ));
        Ok(instance)
    }

    /// Transient bind to detect a port held by this or any other process.
    fn probe_port(&self, port: u16) -> EngineResult<()> {
        if self
            .instances
            .read()
            .values()
            .any(|instance| instance.config().port == port && instance.is_started())
        {
            return Err(EngineError::PortInUse(port));
        }
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                drop(listener);
                Ok(())
            }
            Err(_) => Err(EngineError::PortInUse(port)),
        }
    }

    /// Stop and dispose an instance, removing its persisted configuration
    /// and everything it owns (stumps, recordings).
    pub async fn delete_server_instance(&self, id: &str) -> EngineResult<()> {
        let instance = self
            .instances
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))?;

        instance.stop();

        let host_key = instance.config().host_key();
        for stump in instance.stumps() {
            self.data_access.delete_stump(&host_key, &stump.id)?;
        }
        self.data_access.delete_proxy_config(id)?;
        self.log.info(&format!("instance `{id}` deleted"));
        Ok(())
    }

    pub fn find_server_instance(&self, id: &str) -> EngineResult<Arc<ProxyServerInstance>> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))
    }

    pub fn find_all_server_instances(&self) -> Vec<Arc<ProxyServerInstance>> {
        self.instances.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.instances.read().len()
    }

    /// Reconstruct all persisted instances, rehydrate their stumps, and
    /// start those flagged auto-start. Returns how many were loaded.
    pub async fn load(&self) -> EngineResult<usize> {
        let configs = self.data_access.find_all_proxy_configs()?;
        let mut loaded = 0;

        for config in configs {
            if self.instances.read().contains_key(&config.id) {
                continue;
            }
            let auto_start = config.auto_start;
            let id = config.id.clone();
            let instance = Arc::new(ProxyServerInstance::new(
                config,
                Arc::clone(&self.data_access),
                Arc::clone(&self.id_generator),
                Arc::clone(&self.log),
            )?);
            instance.load_stumps()?;
            if auto_start {
                if let Err(e) = instance.start().await {
                    // A port gone missing must not block the rest of the
                    // registry from loading.
                    self.log.exception("proxy_host.load", &e);
                }
            }
            self.instances.write().insert(id, instance);
            loaded += 1;
        }

        self.log.info(&format!("loaded {loaded} instance(s)"));
        Ok(loaded)
    }

    /// Stop every instance; used on process shutdown.
    pub fn shutdown(&self) {
        for instance in self.instances.read().values() {
            instance.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_support::CapturingLog;
    use crate::storage::InMemoryDataAccess;

    fn host() -> ProxyHost {
        ProxyHost::new(
            Arc::new(InMemoryDataAccess::new()),
            Arc::new(CapturingLog::default()),
        )
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind ephemeral port")
            .local_addr()
            .expect("local addr")
            .port()
    }

    #[tokio::test]
    async fn test_empty_host_name_rejected() {
        let err = host()
            .create_server_instance("", free_port(), false, false)
            .await
            .unwrap_err();
        assert_eq!(err.argument_name(), Some("external_host_name"));
    }

    #[tokio::test]
    async fn test_port_zero_rejected() {
        let err = host()
            .create_server_instance("example.com", 0, false, false)
            .await
            .unwrap_err();
        assert_eq!(err.argument_name(), Some("port"));
    }

    #[tokio::test]
    async fn test_occupied_port_is_network_unavailable() {
        let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = host()
            .create_server_instance("example.com", port, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PortInUse(p) if p == port));
    }

    #[tokio::test]
    async fn test_create_find_delete_round_trip() {
        let host = host();
        let instance = host
            .create_server_instance("example.com", free_port(), false, false)
            .await
            .unwrap();
        let id = instance.id().to_string();

        assert_eq!(host.count(), 1);
        assert_eq!(host.find_server_instance(&id).unwrap().id(), id);

        host.delete_server_instance(&id).await.unwrap();
        assert_eq!(host.count(), 0);
        assert!(matches!(
            host.find_server_instance(&id),
            Err(EngineError::InstanceNotFound(_))
        ));
        assert!(matches!(
            host.delete_server_instance(&id).await,
            Err(EngineError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_start_binds_immediately() {
        let host = host();
        let instance = host
            .create_server_instance("example.com", free_port(), false, true)
            .await
            .unwrap();
        assert!(instance.is_started());
        instance.stop();
    }

    #[tokio::test]
    async fn test_load_reconstructs_persisted_instances() {
        let data_access = Arc::new(InMemoryDataAccess::new());
        let log: Arc<dyn EventLog> = Arc::new(CapturingLog::default());
        let port = free_port();

        {
            let first = ProxyHost::new(
                Arc::clone(&data_access) as Arc<dyn DataAccess>,
                Arc::clone(&log),
            );
            let instance = first
                .create_server_instance("example.com:8080", port, true, false)
                .await
                .unwrap();
            instance
                .create_stump(crate::stump::StumpDefinition::new("persisted"))
                .unwrap();
            first.shutdown();
        }

        let second = ProxyHost::new(data_access as Arc<dyn DataAccess>, log);
        assert_eq!(second.load().await.unwrap(), 1);
        let instance = &second.find_all_server_instances()[0];
        assert_eq!(instance.config().external_host_name, "example.com:8080");
        assert!(instance.config().use_ssl);
        assert!(instance.stump_name_exists("persisted"));
        assert!(!instance.is_started());
    }

    #[tokio::test]
    async fn test_delete_removes_persisted_stumps() {
        let data_access = Arc::new(InMemoryDataAccess::new());
        let host = ProxyHost::new(
            Arc::clone(&data_access) as Arc<dyn DataAccess>,
            Arc::new(CapturingLog::default()),
        );
        let instance = host
            .create_server_instance("example.com", free_port(), false, false)
            .await
            .unwrap();
        let host_key = instance.config().host_key();
        instance
            .create_stump(crate::stump::StumpDefinition::new("gone-with-instance"))
            .unwrap();
        let id = instance.id().to_string();
        drop(instance);

        host.delete_server_instance(&id).await.unwrap();
        assert!(data_access.find_all_stumps(&host_key).unwrap().is_empty());
        assert!(data_access.find_all_proxy_configs().unwrap().is_empty());
    }
}
