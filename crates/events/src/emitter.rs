//! Event emission abstraction.
//!
//! An `EventEmitter` takes an [`Event`] and delivers it to zero or more
//! subscribers. Two variants ship:
//!
//! - [`crate::NoopEventEmitter`]: buffers events in memory for inspection
//! - [`crate::FanoutEventEmitter`]: publishes to a fan-out exchange per event type
//!
//! ## Delivery Guarantees
//!
//! Emission is **at-least-once at best**: there is no retry and no tracking of
//! acknowledgments. Failures are surfaced to the caller, which owns any retry
//! policy. There is no ordering guarantee across event types.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::event::Event;

/// Emission failure (delivery failure).
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to open broker channel: {0}")]
    Channel(#[source] BrokerError),

    #[error("failed to provision exchange '{exchange}': {source}")]
    Provision {
        exchange: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to publish to exchange '{exchange}': {source}")]
    Publish {
        exchange: String,
        #[source]
        source: BrokerError,
    },
}

impl EmitError {
    /// The broker error underneath this failure.
    pub fn broker_error(&self) -> &BrokerError {
        match self {
            EmitError::Channel(source)
            | EmitError::Provision { source, .. }
            | EmitError::Publish { source, .. } => source,
        }
    }
}

/// Delivers events to subscribers.
///
/// The trait requires `Send + Sync`; implementations must be safe to share
/// across tasks.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: &dyn Event) -> Result<(), EmitError>;
}

#[async_trait]
impl<E> EventEmitter for Arc<E>
where
    E: EventEmitter + ?Sized,
{
    async fn emit(&self, event: &dyn Event) -> Result<(), EmitError> {
        (**self).emit(event).await
    }
}
