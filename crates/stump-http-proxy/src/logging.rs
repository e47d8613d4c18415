//! Logging boundary consumed by the engine.
//!
//! The engine never talks to a logging backend directly; it records
//! informational messages and handler failures through [`EventLog`].
//! The default implementation forwards to the `tracing` ecosystem.

use std::fmt::Display;

/// Fire-and-forget log sink. Implementations must never panic.
pub trait EventLog: Send + Sync {
    /// Record an informational message.
    fn info(&self, message: &str);

    /// Record a failure observed at `location`.
    fn exception(&self, location: &str, error: &dyn Display);
}

/// Default [`EventLog`] backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn exception(&self, location: &str, error: &dyn Display) {
        tracing::error!(location, "{error}");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::EventLog;
    use parking_lot::Mutex;
    use std::fmt::Display;
    use std::sync::Arc;

    /// Captures log lines for assertions.
    #[derive(Default, Clone)]
    pub struct CapturingLog {
        pub entries: Arc<Mutex<Vec<String>>>,
    }

    impl EventLog for CapturingLog {
        fn info(&self, message: &str) {
            self.entries.lock().push(format!("INFO {message}"));
        }

        fn exception(&self, location: &str, error: &dyn Display) {
            self.entries.lock().push(format!("ERROR {location}: {error}"));
        }
    }
}
