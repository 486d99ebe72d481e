//! SQL trace hook
//!
//! A session forwards every SQL string to its trace sink before sending it.

/// Receives each SQL statement a session is about to send
pub trait TraceSink: Send + Sync {
    /// Called once per statement, before it goes on the wire
    fn on_trace_line(&self, line: &str);
}

/// Trace sink that emits each statement as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn on_trace_line(&self, line: &str) {
        tracing::debug!(target: "cubesql::trace", sql = line, "statement");
    }
}

impl<F> TraceSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_trace_line(&self, line: &str) {
        self(line)
    }
}
