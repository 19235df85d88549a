//! Broker collaborator interface (mechanics only).
//!
//! The fan-out emitter talks to a message broker through three small traits:
//!
//! ```text
//! Broker ──channel()──▶ BrokerChannel ──declare_fanout()──▶ Exchange ──publish()──▶ subscribers
//! ```
//!
//! - **Broker**: a long-lived connection. Connection-level recovery is the
//!   implementation's business, not the emitter's.
//! - **BrokerChannel**: a lightweight session used to provision exchanges.
//! - **Exchange**: a named fan-out distribution point. Every subscriber bound
//!   to it receives every message; there is no content-based routing.
//!
//! Declaring an exchange is **idempotent**: re-declaring one with the same
//! parameters returns a handle to the existing exchange.
//!
//! Implementations: [`crate::InMemoryBroker`] (tests/dev) and the Redis adapter
//! in `shipyard-infra` (feature `redis`).

use std::time::Duration;
use std::sync::mpsc::Receiver;

use async_trait::async_trait;
use thiserror::Error;

/// Broker communication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("exchange declaration failed: {0}")]
    Declare(String),

    #[error("publish failed: {0}")]
    Publish(String),
}

/// A long-lived broker connection able to open channels.
#[async_trait]
pub trait Broker: Send + Sync {
    type Channel: BrokerChannel;

    async fn channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// A channel used to provision exchanges.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    type Exchange: Exchange;

    /// Declare a fan-out exchange named `name` (idempotent).
    async fn declare_fanout(&self, name: &str, durable: bool) -> Result<Self::Exchange, BrokerError>;
}

/// Handle to a provisioned fan-out exchange.
#[async_trait]
pub trait Exchange: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Publish an opaque payload. Fan-out exchanges ignore `routing_key`.
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<(), BrokerError>;
}

/// Exchange handle type produced by broker `B`.
pub type ExchangeOf<B> = <<B as Broker>::Channel as BrokerChannel>::Exchange;

/// A message as received by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Decode the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A subscription bound to one exchange.
///
/// Each subscription gets a copy of every message published to the exchange
/// it is bound to (broadcast semantics). Subscriptions are designed for
/// single-consumer use.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}
