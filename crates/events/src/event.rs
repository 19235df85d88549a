//! The event value type and the project lifecycle events.

use serde_json::Value as JsonValue;

use shipyard_core::{Document, ProjectId};

/// A notification about a state change, delivered to external subscribers.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **typed** by a stable, non-empty `event_type` (e.g. `"project.created"`),
///   which doubles as the broker-side exchange name
/// - **self-describing**: `to_document()` yields the payload body; the type
///   travels out of band
pub trait Event: core::fmt::Debug + Send + Sync {
    /// Stable event name/type identifier.
    fn event_type(&self) -> &'static str;

    /// Payload body as an ordered document.
    fn to_document(&self) -> Document;

    /// JSON encoding of [`Event::to_document`].
    fn to_json(&self) -> String {
        JsonValue::Object(self.to_document()).to_string()
    }
}

macro_rules! project_event {
    ($(#[$meta:meta])* $name:ident, $event_type:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            project_id: ProjectId,
        }

        impl $name {
            pub const EVENT_TYPE: &'static str = $event_type;

            pub fn new(project_id: ProjectId) -> Self {
                Self { project_id }
            }

            pub fn project_id(&self) -> ProjectId {
                self.project_id
            }
        }

        impl Event for $name {
            fn event_type(&self) -> &'static str {
                Self::EVENT_TYPE
            }

            fn to_document(&self) -> Document {
                let mut doc = Document::new();
                doc.insert(
                    "project_id".to_string(),
                    JsonValue::String(self.project_id.to_string()),
                );
                doc
            }
        }
    };
}

project_event!(
    /// A project was created and persisted.
    ProjectCreated,
    "project.created"
);

project_event!(
    /// A project's environment or status was patched.
    ProjectUpdated,
    "project.updated"
);

project_event!(
    /// A project was deleted (directly, not via owner cascade).
    ProjectDeleted,
    "project.deleted"
);
