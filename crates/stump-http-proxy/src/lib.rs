//! Stump: an HTTP stubbing and interception proxy.
//!
//! Each proxied external host gets its own listening port. Requests that
//! match a registered stump are answered from its canned responses; the
//! rest are forwarded to the real origin, optionally recorded on the way
//! through.

pub mod config;
pub mod context;
pub mod encoding;
pub mod error;
pub mod host;
pub mod instance;
pub mod logging;
pub mod pipeline;
pub mod recording;
pub mod rules;
pub mod selection;
pub mod server;
pub mod storage;
pub mod stump;

pub use config::ProxyServerConfig;
pub use context::{ProxyContext, ProxyRequest, ProxyResponse};
pub use encoding::ContentEncoder;
pub use error::{EngineError, EngineResult};
pub use host::ProxyHost;
pub use instance::ProxyServerInstance;
pub use logging::{EventLog, TracingLog};
pub use pipeline::{ProcessResult, RequestHandler, RequestPipeline};
pub use recording::{RecordedContext, TrafficRecorder};
pub use rules::MatchRule;
pub use selection::ResponseSelector;
pub use server::{ListeningServer, RequestObserver};
pub use storage::{DataAccess, InMemoryDataAccess};
pub use stump::{IdGenerator, RandomIdGenerator, ResponseSpec, SelectionPolicy, StumpDefinition};
