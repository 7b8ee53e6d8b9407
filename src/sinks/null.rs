//! Used wherever a subcommand leaves the failure or info queue/topic
//! unconfigured and the backend has no built-in escalation path (e.g.
//! a plain Kafka consumer with no failure topic set). Publishing to it
//! is a deliberate drop, logged loudly at the call site rather than
//! silently here.

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::sinks::Sink;

#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn publish(&self, _payload: &str) -> Result<(), SinkError> {
        Ok(())
    }
}
