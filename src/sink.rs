//! Sink interface. The sidecar only depends on this trait; the actual
//! persistence/forwarding implementation is an external collaborator and
//! is not provided here.

use async_trait::async_trait;

use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Drained events are handed to the sink one at a time. The sink must
/// tolerate reordering across producers — ordering across concurrent
/// producers is not guaranteed — and should not block the calling worker for long;
/// the sidecar's drain loop does not impose an internal timeout on
/// `accept` itself, relying on `observe`'s fail-open wrapping only for
/// panics, not for slow-but-successful sinks.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn accept(&self, event: Event) -> Result<(), SinkError>;
}

/// A sink that discards everything, useful for tests and for running the
/// sidecar with persistence disabled.
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn accept(&self, _event: Event) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Stream};

    #[tokio::test]
    async fn null_sink_always_succeeds() {
        let sink = NullSink;
        let event = Event::new(EventKind::Log, Stream::Logs);
        assert!(sink.accept(event).await.is_ok());
    }
}
