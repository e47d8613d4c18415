//! Per-port listening server.
//!
//! One `ListeningServer` owns one TCP listener. The accept loop runs on its
//! own task and selects between incoming connections and a broadcast
//! shutdown signal, so a deliberate `stop()` ends the loop without any
//! transport error escaping. Every accepted connection is served on its own
//! task; every request is flattened into a [`ProxyContext`] and dispatched
//! through the pipeline.

use crate::context::{ProxyContext, ProxyRequest, ProxyResponse};
use crate::error::{EngineError, EngineResult};
use crate::logging::EventLog;
use crate::pipeline::RequestPipeline;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle observer fired once per request, outside the pipeline.
pub trait RequestObserver: Send + Sync {
    /// Before pipeline dispatch.
    fn request_starting(&self, request: &ProxyRequest);

    /// After pipeline completion, with the response (if any) in place.
    fn request_finishing(&self, context: &ProxyContext);
}

/// Error used to abort a connection without writing any response bytes.
#[derive(Debug)]
struct ConnectionDropped;

impl fmt::Display for ConnectionDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection dropped by response directive")
    }
}

impl std::error::Error for ConnectionDropped {}

/// One network listener bound to one port.
pub struct ListeningServer {
    port: u16,
    pipeline: Arc<RequestPipeline>,
    observers: Arc<RwLock<Vec<Arc<dyn RequestObserver>>>>,
    log: Arc<dyn EventLog>,
    started: AtomicBool,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

impl ListeningServer {
    /// Construct a server for `port`. Fails with `InvalidArgument("port")`
    /// when the port is outside the bindable range.
    pub fn new(
        port: u16,
        pipeline: Arc<RequestPipeline>,
        log: Arc<dyn EventLog>,
    ) -> EngineResult<Self> {
        if port == 0 {
            return Err(EngineError::invalid_argument(
                "port",
                "port must be within the valid TCP range",
            ));
        }
        Ok(Self {
            port,
            pipeline,
            observers: Arc::new(RwLock::new(Vec::new())),
            log,
            started: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Attach an observer; observers see every request on this listener.
    pub fn add_observer(&self, observer: Arc<dyn RequestObserver>) {
        self.observers.write().push(observer);
    }

    /// Bind the port and begin accepting. No-op when already started; the
    /// atomic swap makes concurrent calls safe against double-binding.
    pub async fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match TcpListener::bind(("0.0.0.0", self.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(if e.kind() == std::io::ErrorKind::AddrInUse {
                    EngineError::PortInUse(self.port)
                } else {
                    EngineError::Bind(self.port, e.to_string())
                });
            }
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shutdown.lock() = Some(shutdown_tx);

        self.log.info(&format!("listening on port {}", self.port));
        tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.port,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.observers),
            Arc::clone(&self.log),
        ));
        Ok(())
    }

    /// End the accept loop and release the port. No-op when already
    /// stopped. In-flight connections run to completion on their own tasks.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        self.log.info(&format!("listener on port {} stopped", self.port));
    }
}

impl Drop for ListeningServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
    port: u16,
    pipeline: Arc<RequestPipeline>,
    observers: Arc<RwLock<Vec<Arc<dyn RequestObserver>>>>,
    log: Arc<dyn EventLog>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let pipeline = Arc::clone(&pipeline);
                        let observers = Arc::clone(&observers);
                        let log = Arc::clone(&log);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let pipeline = Arc::clone(&pipeline);
                                let observers = Arc::clone(&observers);
                                let log = Arc::clone(&log);
                                async move { serve_request(req, addr, pipeline, observers, log).await }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                // Drop directives surface here as service
                                // errors; either way the connection is done.
                                debug!("connection on port {port} ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        // One bad connection must not take the listener down.
                        log.exception("listening_server.accept", &e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// Flatten the transport request, run the pipeline, fire observers, and
/// render the response. Pipeline failures become a generic server error;
/// detail stays in the log.
async fn serve_request(
    req: Request<Incoming>,
    client_addr: SocketAddr,
    pipeline: Arc<RequestPipeline>,
    observers: Arc<RwLock<Vec<Arc<dyn RequestObserver>>>>,
    log: Arc<dyn EventLog>,
) -> Result<Response<Full<Bytes>>, ConnectionDropped> {
    let request = read_request(req, client_addr).await;

    for observer in observers.read().iter() {
        observer.request_starting(&request);
    }

    let mut context = ProxyContext::new(request);
    if let Err(e) = pipeline.process_request(&mut context).await {
        log.exception("request_pipeline.process_request", &e);
        context.response = Some(ProxyResponse::server_error());
    }

    for observer in observers.read().iter() {
        observer.request_finishing(&context);
    }

    let Some(response) = context.response else {
        // Nothing terminated the pipeline; nothing to say about this path.
        return Ok(plain_response(StatusCode::NOT_FOUND, "no handler produced a response"));
    };

    if response.drop_connection {
        return Err(ConnectionDropped);
    }

    Ok(render_response(&response))
}

async fn read_request(req: Request<Incoming>, client_addr: SocketAddr) -> ProxyRequest {
    let (parts, body) = req.into_parts();
    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(e) => {
            debug!("failed to read request body: {e}");
            Vec::new()
        }
    };

    ProxyRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
        client_addr: Some(client_addr),
    }
}

fn render_response(response: &ProxyResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (k, v) in &response.headers {
        builder = builder.header(k, v);
    }
    builder
        .body(Full::new(Bytes::from(response.body.clone())))
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "response build error"))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from(body))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_support::CapturingLog;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind ephemeral port")
            .local_addr()
            .expect("local addr")
            .port()
    }

    fn server(port: u16) -> ListeningServer {
        ListeningServer::new(
            port,
            Arc::new(RequestPipeline::new()),
            Arc::new(CapturingLog::default()),
        )
        .expect("valid server")
    }

    #[test]
    fn test_port_zero_is_rejected() {
        let err = ListeningServer::new(
            0,
            Arc::new(RequestPipeline::new()),
            Arc::new(CapturingLog::default()),
        )
        .unwrap_err();
        assert_eq!(err.argument_name(), Some("port"));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let log = CapturingLog::default();
        let server = ListeningServer::new(
            free_port(),
            Arc::new(RequestPipeline::new()),
            Arc::new(log.clone()),
        )
        .unwrap();
        assert!(!server.is_started());

        server.start().await.unwrap();
        assert!(server.is_started());
        // Second start is a no-op, not a double-bind.
        server.start().await.unwrap();
        assert!(server.is_started());

        server.stop();
        assert!(!server.is_started());
        server.stop();
        assert!(!server.is_started());

        let entries = log.entries.lock().clone();
        assert_eq!(entries.iter().filter(|e| e.contains("listening")).count(), 1);
        assert_eq!(entries.iter().filter(|e| e.contains("stopped")).count(), 1);
    }

    #[tokio::test]
    async fn test_restart_rebinds_the_port() {
        let server = server(free_port());
        server.start().await.unwrap();
        server.stop();
        // The shutdown signal releases the listener; give the loop a tick.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        server.start().await.unwrap();
        assert!(server.is_started());
        server.stop();
    }

    #[tokio::test]
    async fn test_start_fails_when_port_is_taken() {
        let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = server(port);
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, EngineError::PortInUse(p) if p == port));
        assert!(!server.is_started());
    }
}
