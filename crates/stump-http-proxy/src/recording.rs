//! Traffic recording.
//!
//! When recording is enabled for an instance, every completed exchange is
//! captured as an immutable [`RecordedContext`], whether it was answered by
//! a stump or relayed from the origin.

use crate::context::{ProxyContext, ProxyRequest, ProxyResponse};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Snapshot of an observed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_from: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<&ProxyRequest> for RecordedRequest {
    fn from(request: &ProxyRequest) -> Self {
        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            request_from: request.client_addr.map(|addr| addr.to_string()),
            received_at: Utc::now(),
        }
    }
}

/// Snapshot of the response written for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResponse {
    pub status: u16,
    pub status_description: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl From<&ProxyResponse> for RecordedResponse {
    fn from(response: &ProxyResponse) -> Self {
        Self {
            status: response.status,
            status_description: response.status_description.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

/// One captured exchange. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedContext {
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

impl RecordedContext {
    /// Capture a completed pipeline context. A dropped connection records a
    /// default response so the request itself is still visible.
    pub fn capture(context: &ProxyContext) -> Self {
        let response = context
            .response
            .as_ref()
            .map(RecordedResponse::from)
            .unwrap_or_else(|| RecordedResponse {
                status: 0,
                status_description: String::new(),
                headers: HashMap::new(),
                body: Vec::new(),
            });
        Self {
            request: RecordedRequest::from(&context.request),
            response,
        }
    }
}

/// Append-only store of captured exchanges for one instance.
pub struct TrafficRecorder {
    entries: RwLock<Vec<RecordedContext>>,
    enabled: AtomicBool,
}

impl TrafficRecorder {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Append an exchange; no-op while recording is disabled.
    pub fn record(&self, context: &ProxyContext) {
        if !self.is_enabled() {
            return;
        }
        self.entries.write().push(RecordedContext::capture(context));
    }

    pub fn entries(&self) -> Vec<RecordedContext> {
        self.entries.read().clone()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for TrafficRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::request_with_body;

    fn completed_context() -> ProxyContext {
        let mut context = ProxyContext::new(request_with_body("POST", "/orders", b"{}"));
        context.response = Some(ProxyResponse {
            status: 201,
            body: b"created".to_vec(),
            ..ProxyResponse::default()
        });
        context
    }

    #[test]
    fn test_disabled_recorder_captures_nothing() {
        let recorder = TrafficRecorder::new();
        recorder.record(&completed_context());
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_enabled_recorder_appends_exchanges() {
        let recorder = TrafficRecorder::new();
        recorder.set_enabled(true);
        recorder.record(&completed_context());
        recorder.record(&completed_context());

        let entries = recorder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request.method, "POST");
        assert_eq!(entries[0].response.status, 201);
        assert_eq!(entries[0].response.body, b"created");
    }

    #[test]
    fn test_clear_empties_the_store() {
        let recorder = TrafficRecorder::new();
        recorder.set_enabled(true);
        recorder.record(&completed_context());
        assert_eq!(recorder.len(), 1);
        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_capture_without_response_records_request() {
        let context = ProxyContext::new(request_with_body("GET", "/x", b""));
        let captured = RecordedContext::capture(&context);
        assert_eq!(captured.request.path, "/x");
        assert_eq!(captured.response.status, 0);
    }
}
