//! No-op emitter: records events instead of delivering them.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use shipyard_core::Document;

use crate::emitter::{EmitError, EventEmitter};
use crate::event::Event;

/// An event as the no-op emitter saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event_type: String,
    pub document: Document,
}

/// Emitter that appends every event to an in-memory sequence.
///
/// - Never fails
/// - Preserves call order
/// - Intended for tests of calling code; production wiring uses a broker
#[derive(Debug, Default)]
pub struct NoopEventEmitter {
    events: Mutex<Vec<RecordedEvent>>,
}

impl NoopEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The events emitted so far, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventEmitter for NoopEventEmitter {
    async fn emit(&self, event: &dyn Event) -> Result<(), EmitError> {
        let recorded = RecordedEvent {
            event_type: event.event_type().to_string(),
            document: event.to_document(),
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ProjectCreated, ProjectDeleted};
    use shipyard_core::ProjectId;

    #[tokio::test]
    async fn records_events_in_call_order() {
        let emitter = NoopEventEmitter::new();
        let first = ProjectId::new();
        let second = ProjectId::new();

        emitter.emit(&ProjectCreated::new(first)).await.unwrap();
        emitter.emit(&ProjectDeleted::new(second)).await.unwrap();

        let events = emitter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "project.created");
        assert_eq!(events[0].document["project_id"], first.to_string());
        assert_eq!(events[1].event_type, "project.deleted");
        assert_eq!(events[1].document["project_id"], second.to_string());
    }

    #[tokio::test]
    async fn starts_empty() {
        assert!(NoopEventEmitter::new().events().is_empty());
    }
}
