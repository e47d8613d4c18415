//! The request-dispatch pipeline.
//!
//! Handlers run in registration order; the first one to return
//! [`ProcessResult::Terminate`] ends the chain and its result becomes the
//! pipeline's result. Handler failures propagate to the caller (the
//! listening server), which owns converting them into a generic error
//! response.

use crate::context::ProxyContext;
use crate::error::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Whether dispatch should keep going after a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    Continue,
    Terminate,
}

/// One stage of request processing.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn process_request(&self, context: &mut ProxyContext) -> EngineResult<ProcessResult>;
}

/// Ordered chain of handlers with short-circuit semantics.
#[derive(Default)]
pub struct RequestPipeline {
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler; dispatch order is registration order.
    pub fn add(&mut self, handler: Arc<dyn RequestHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the chain. An empty pipeline, or one whose handlers all
    /// continue, yields `Continue`.
    pub async fn process_request(&self, context: &mut ProxyContext) -> EngineResult<ProcessResult> {
        for handler in &self.handlers {
            if handler.process_request(context).await? == ProcessResult::Terminate {
                return Ok(ProcessResult::Terminate);
            }
        }
        Ok(ProcessResult::Continue)
    }
}
