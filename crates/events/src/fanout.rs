//! Broker-backed emitter with one fan-out exchange per event type.
//!
//! ## Exchange Cache
//!
//! The emitter memoizes the exchange handle for each event type it has seen.
//! The first emission of a type opens a channel and declares a durable fan-out
//! exchange named after the type; later emissions of that type publish straight
//! to the cached handle.
//!
//! Cache behaviour on failure:
//!
//! | failure | cache afterwards | next emit of that type |
//! |---------|------------------|------------------------|
//! | channel open | unchanged | opens a channel again |
//! | declaration | unchanged | re-declares |
//! | publish | handle kept | publishes only |
//!
//! The cache is guarded by an async mutex held across declaration, so
//! concurrent first emissions of one type still declare once. The cache is
//! never evicted; event types are a small fixed set.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::broker::{Broker, BrokerChannel, Exchange, ExchangeOf};
use crate::emitter::{EmitError, EventEmitter};
use crate::event::Event;

/// Routing key used for every publish; fan-out exchanges ignore it.
const FANOUT_ROUTING_KEY: &str = "";

pub struct FanoutEventEmitter<B: Broker> {
    broker: B,
    exchanges: Mutex<HashMap<String, ExchangeOf<B>>>,
}

impl<B: Broker> FanoutEventEmitter<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            exchanges: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Number of event types with a provisioned exchange.
    pub async fn cached_exchanges(&self) -> usize {
        self.exchanges.lock().await.len()
    }

    /// Return the cached exchange for `event_type`, provisioning it on a miss.
    async fn exchange_for(&self, event_type: &str) -> Result<ExchangeOf<B>, EmitError> {
        let mut cache = self.exchanges.lock().await;
        if let Some(exchange) = cache.get(event_type) {
            return Ok(exchange.clone());
        }

        let channel = self.broker.channel().await.map_err(EmitError::Channel)?;
        let exchange = channel
            .declare_fanout(event_type, true)
            .await
            .map_err(|source| EmitError::Provision {
                exchange: event_type.to_string(),
                source,
            })?;

        debug!(exchange = event_type, "provisioned fan-out exchange");
        cache.insert(event_type.to_string(), exchange.clone());
        Ok(exchange)
    }
}

impl<B: Broker> core::fmt::Debug for FanoutEventEmitter<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FanoutEventEmitter").finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: Broker> EventEmitter for FanoutEventEmitter<B> {
    #[instrument(skip_all, fields(event_type = event.event_type()), err)]
    async fn emit(&self, event: &dyn Event) -> Result<(), EmitError> {
        let exchange = self.exchange_for(event.event_type()).await?;

        let body = event.to_json().into_bytes();
        exchange
            .publish(FANOUT_ROUTING_KEY, body)
            .await
            .map_err(|source| EmitError::Publish {
                exchange: exchange.name().to_string(),
                source,
            })
    }
}
