//! Operator-facing message sinks.

use parking_lot::Mutex;

/// Receives the messages an operator should see while uploads or tests run.
pub trait UploadLogger: Send + Sync {
    /// Progress and result messages.
    fn log(&self, message: &str);

    /// Errors caused by how the operation was requested (bad method, missing
    /// arguments). Only the initiator needs to see these.
    fn initiator_error(&self, message: &str);
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl UploadLogger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn initiator_error(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Keeps every message in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl UploadLogger for MemoryLogger {
    fn log(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn initiator_error(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }
}
