//! The proxy server instance: lifecycle and stump management for one
//! proxied external host.

use super::handlers::{OriginForwardingHandler, StumpResponseHandler};
use crate::config::ProxyServerConfig;
use crate::context::{ProxyContext, ProxyRequest};
use crate::error::{EngineError, EngineResult};
use crate::logging::EventLog;
use crate::pipeline::RequestPipeline;
use crate::recording::{RecordedContext, TrafficRecorder};
use crate::rules::all_rules_match;
use crate::selection::ResponseSelector;
use crate::server::{ListeningServer, RequestObserver};
use crate::storage::DataAccess;
use crate::stump::{IdGenerator, StumpDefinition};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// State shared between the instance and its pipeline handlers.
pub(crate) struct InstanceState {
    pub(crate) config: ProxyServerConfig,
    /// Ordered; matching walks registration order and the first full match
    /// wins.
    pub(crate) stumps: RwLock<Vec<StumpDefinition>>,
    pub(crate) selector: ResponseSelector,
    pub(crate) recorder: TrafficRecorder,
    pub(crate) log: Arc<dyn EventLog>,
    pub(crate) request_count: AtomicU64,
}

impl InstanceState {
    pub(crate) fn new(config: ProxyServerConfig, log: Arc<dyn EventLog>) -> Arc<Self> {
        Arc::new(Self {
            config,
            stumps: RwLock::new(Vec::new()),
            selector: ResponseSelector::new(),
            recorder: TrafficRecorder::new(),
            log,
            request_count: AtomicU64::new(0),
        })
    }

    /// First stump whose every rule matches the request, cloned out of the
    /// read lock.
    pub(crate) fn find_matching_stump(&self, request: &ProxyRequest) -> Option<StumpDefinition> {
        let stumps = self.stumps.read();
        stumps
            .iter()
            .find(|stump| all_rules_match(&stump.rules, request))
            .cloned()
    }
}

/// Counts requests and feeds the recorder, outside the pipeline.
struct InstanceObserver {
    state: Arc<InstanceState>,
}

impl RequestObserver for InstanceObserver {
    fn request_starting(&self, _request: &ProxyRequest) {
        self.state.request_count.fetch_add(1, Ordering::SeqCst);
    }

    fn request_finishing(&self, context: &ProxyContext) {
        self.state.recorder.record(context);
    }
}

/// One proxied external host. Owns the listener, the stump collection, the
/// recording state, and the forwarding path to the real origin.
pub struct ProxyServerInstance {
    state: Arc<InstanceState>,
    server: ListeningServer,
    data_access: Arc<dyn DataAccess>,
    id_generator: Arc<dyn IdGenerator>,
}

impl ProxyServerInstance {
    pub fn new(
        config: ProxyServerConfig,
        data_access: Arc<dyn DataAccess>,
        id_generator: Arc<dyn IdGenerator>,
        log: Arc<dyn EventLog>,
    ) -> EngineResult<Self> {
        let state = InstanceState::new(config, Arc::clone(&log));

        let mut pipeline = RequestPipeline::new();
        pipeline.add(Arc::new(StumpResponseHandler::new(Arc::clone(&state))));
        pipeline.add(Arc::new(OriginForwardingHandler::new(Arc::clone(&state))));

        let server = ListeningServer::new(state.config.port, Arc::new(pipeline), log)?;
        server.add_observer(Arc::new(InstanceObserver {
            state: Arc::clone(&state),
        }));

        Ok(Self {
            state,
            server,
            data_access,
            id_generator,
        })
    }

    pub fn config(&self) -> &ProxyServerConfig {
        &self.state.config
    }

    pub fn id(&self) -> &str {
        &self.state.config.id
    }

    // ---- Lifecycle -------------------------------------------------------

    pub async fn start(&self) -> EngineResult<()> {
        self.server.start().await
    }

    pub fn stop(&self) {
        self.server.stop();
    }

    pub fn is_started(&self) -> bool {
        self.server.is_started()
    }

    // ---- Stumps ----------------------------------------------------------

    /// Register a new stump: validate, assign an id, persist (side-car
    /// payloads included), and add it to the matching order.
    pub fn create_stump(&self, mut definition: StumpDefinition) -> EngineResult<StumpDefinition> {
        if definition.name.is_empty() {
            return Err(EngineError::invalid_argument("name", "name must not be empty"));
        }
        if self.stump_name_exists(&definition.name) {
            return Err(EngineError::DuplicateStumpName(definition.name));
        }

        definition.id = self.id_generator.generate();

        let match_body = definition.match_body();
        let response_body = definition
            .responses
            .first()
            .filter(|r| !r.body.is_empty())
            .map(|r| r.body.clone());

        let stored = self.data_access.create_stump(
            &self.state.config.host_key(),
            &definition,
            match_body.as_deref(),
            response_body.as_deref(),
        )?;

        // Carry the storage-assigned resource references; the in-memory
        // bodies stay authoritative for matching and delivery.
        definition.match_body_resource = stored.match_body_resource;
        for (response, stored_response) in
            definition.responses.iter_mut().zip(stored.responses.iter())
        {
            response.body_resource = stored_response.body_resource.clone();
        }

        self.state.stumps.write().push(definition.clone());
        self.state
            .log
            .info(&format!("stump `{}` registered", definition.name));
        Ok(definition)
    }

    /// Remove a stump from matching, selection state, and storage.
    /// Idempotent when the id is unknown.
    pub fn delete_stump(&self, stump_id: &str) -> EngineResult<()> {
        self.state.stumps.write().retain(|s| s.id != stump_id);
        self.state.selector.forget(stump_id);
        self.data_access
            .delete_stump(&self.state.config.host_key(), stump_id)
    }

    /// Exact name lookup used to pre-validate uniqueness.
    pub fn stump_name_exists(&self, name: &str) -> bool {
        self.state.stumps.read().iter().any(|s| s.name == name)
    }

    /// Fetch one stump by id.
    pub fn find_stump(&self, stump_id: &str) -> EngineResult<StumpDefinition> {
        self.state
            .stumps
            .read()
            .iter()
            .find(|s| s.id == stump_id)
            .cloned()
            .ok_or_else(|| EngineError::StumpNotFound(stump_id.to_string()))
    }

    pub fn stumps(&self) -> Vec<StumpDefinition> {
        self.state.stumps.read().clone()
    }

    pub fn stump_count(&self) -> usize {
        self.state.stumps.read().len()
    }

    /// Replace the in-memory collection with the persisted one.
    pub fn load_stumps(&self) -> EngineResult<usize> {
        let stumps = self
            .data_access
            .find_all_stumps(&self.state.config.host_key())?;
        let count = stumps.len();
        *self.state.stumps.write() = stumps;
        Ok(count)
    }

    // ---- Recording -------------------------------------------------------

    pub fn set_recording(&self, enabled: bool) {
        self.state.recorder.set_enabled(enabled);
    }

    pub fn is_recording(&self) -> bool {
        self.state.recorder.is_enabled()
    }

    pub fn recordings(&self) -> Vec<RecordedContext> {
        self.state.recorder.entries()
    }

    pub fn clear_recordings(&self) {
        self.state.recorder.clear();
    }

    pub fn request_count(&self) -> u64 {
        self.state.request_count.load(Ordering::SeqCst)
    }
}

impl Drop for ProxyServerInstance {
    fn drop(&mut self) {
        self.server.stop();
    }
}
