//! Pipeline handlers owned by a proxy server instance.
//!
//! Two stages: answer from a matching stump, or forward to the real origin.
//! Registration order puts the stump stage first; forwarding terminates the
//! pipeline for everything that falls through.

use super::core::InstanceState;
use crate::context::{ProxyContext, ProxyRequest, ProxyResponse};
use crate::encoding::ContentEncoder;
use crate::error::EngineResult;
use crate::pipeline::{ProcessResult, RequestHandler};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Bounded default for origin calls; the unbounded original behavior on a
/// hung origin is deliberately not reproduced.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Response headers that must not be relayed verbatim.
const SKIPPED_RESPONSE_HEADERS: [&str; 4] =
    ["transfer-encoding", "connection", "keep-alive", "content-length"];

/// Shared HTTP client for origin forwarding.
static FORWARD_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn forward_client() -> &'static reqwest::Client {
    FORWARD_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            // Pooled connections to many short-lived origins go stale.
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_default()
    })
}

/// Answers requests that match one of the instance's stumps.
pub(crate) struct StumpResponseHandler {
    state: Arc<InstanceState>,
}

impl StumpResponseHandler {
    pub(crate) fn new(state: Arc<InstanceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RequestHandler for StumpResponseHandler {
    async fn process_request(&self, context: &mut ProxyContext) -> EngineResult<ProcessResult> {
        let Some(stump) = self.state.find_matching_stump(&context.request) else {
            return Ok(ProcessResult::Continue);
        };

        let Some(spec) = self
            .state
            .selector
            .select(&stump.id, stump.response_selection, &stump.responses)
            .cloned()
        else {
            // A stump with no responses cannot answer; let it fall through.
            return Ok(ProcessResult::Continue);
        };

        debug!(stump = %stump.name, "answering from stump");

        if spec.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(spec.delay_ms)).await;
        }

        if spec.drop_connection {
            context.response = Some(ProxyResponse {
                drop_connection: true,
                ..ProxyResponse::default()
            });
            return Ok(ProcessResult::Terminate);
        }

        let mut response = ProxyResponse {
            status: spec.status_code,
            status_description: spec.status_description.clone(),
            headers: spec.headers.clone(),
            body: spec.body.clone(),
            drop_connection: false,
        };
        if response.header("content-type").is_none() {
            if let Some(ref content_type) = spec.content_type {
                response
                    .headers
                    .insert("Content-Type".to_string(), content_type.clone());
            }
        }
        encode_for_client(&context.request, &mut response);

        context.response = Some(response);
        Ok(ProcessResult::Terminate)
    }
}

/// Forwards unmatched requests to the real origin and relays the answer.
pub(crate) struct OriginForwardingHandler {
    state: Arc<InstanceState>,
}

impl OriginForwardingHandler {
    pub(crate) fn new(state: Arc<InstanceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RequestHandler for OriginForwardingHandler {
    async fn process_request(&self, context: &mut ProxyContext) -> EngineResult<ProcessResult> {
        let request = &context.request;
        let target = format!(
            "{}{}",
            self.state.config.origin_url(),
            request.path_and_query()
        );
        debug!("forwarding to {target}");

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut upstream = forward_client().request(method, &target);

        for (key, value) in &request.headers {
            let key_lower = key.to_ascii_lowercase();
            if key_lower != "host" && key_lower != "content-length" {
                upstream = upstream.header(key.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            upstream = upstream.body(request.body.clone());
        }

        let origin_response = match upstream.send().await {
            Ok(response) => response,
            Err(e) => {
                self.state
                    .log
                    .exception("origin_forwarding.send", &format!("{target}: {e}"));
                context.response = Some(ProxyResponse::service_unavailable());
                return Ok(ProcessResult::Terminate);
            }
        };

        let status = origin_response.status();
        let headers = origin_response
            .headers()
            .iter()
            .filter(|(k, _)| !SKIPPED_RESPONSE_HEADERS.contains(&k.as_str()))
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = match origin_response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                self.state
                    .log
                    .exception("origin_forwarding.read_body", &format!("{target}: {e}"));
                context.response = Some(ProxyResponse::service_unavailable());
                return Ok(ProcessResult::Terminate);
            }
        };

        let mut response = ProxyResponse {
            status: status.as_u16(),
            status_description: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            drop_connection: false,
        };
        decode_for_client(&context.request, &mut response);

        context.response = Some(response);
        Ok(ProcessResult::Terminate)
    }
}

/// Stump bodies are stored plain. A declared `Content-Encoding` is honored
/// only when the client advertises it; otherwise the body goes out plain
/// with the header stripped.
fn encode_for_client(request: &ProxyRequest, response: &mut ProxyResponse) {
    let Some(method) = response.header("content-encoding").map(str::to_string) else {
        return;
    };
    let encoder = ContentEncoder::new(&method);
    if !encoder.is_transforming() {
        return;
    }
    if request.accepts_encoding(&method) {
        if let Ok(Some(encoded)) = encoder.encode(Some(&response.body)) {
            response.body = encoded;
        }
    } else {
        response.remove_header("content-encoding");
    }
    response.remove_header("content-length");
}

/// Relayed origin bodies arrive encoded. When the client does not advertise
/// the origin's encoding, transcode to plain; an undecodable body relays
/// verbatim.
fn decode_for_client(request: &ProxyRequest, response: &mut ProxyResponse) {
    let Some(method) = response.header("content-encoding").map(str::to_string) else {
        return;
    };
    let encoder = ContentEncoder::new(&method);
    if !encoder.is_transforming() || request.accepts_encoding(&method) {
        return;
    }
    if let Ok(Some(decoded)) = encoder.decode(Some(&response.body)) {
        response.body = decoded;
        response.remove_header("content-encoding");
    }
}
