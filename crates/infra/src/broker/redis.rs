//! Redis pub/sub-backed broker (optional).
//!
//! - An exchange is a pub/sub channel named after the exchange. `PUBLISH`
//!   delivers to every subscriber of the channel, which is fan-out.
//! - Declaration records the exchange in a registry hash (`HSETNX name
//!   durability`), so declaring twice is a no-op and a durability conflict is
//!   reported.
//!
//! Note: Redis pub/sub is not durable (messages are dropped if no subscriber is
//! connected). The durability flag is recorded, not enforced.

use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use shipyard_events::{Broker, BrokerChannel, BrokerError, Delivery, Exchange, Subscription};

use crate::config::InfraConfig;

fn durability(durable: bool) -> &'static str {
    if durable { "durable" } else { "transient" }
}

/// Redis-backed broker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RedisBroker {
    client: redis::Client,
    registry: String,
}

impl RedisBroker {
    pub fn new(redis_url: impl AsRef<str>, registry: impl Into<String>) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            registry: registry.into(),
        })
    }

    pub fn from_config(config: &InfraConfig) -> Result<Self, BrokerError> {
        Self::new(&config.redis_url, config.exchange_registry.clone())
    }

    /// Subscribe to `exchange`.
    ///
    /// Messages are forwarded from a background thread holding a blocking
    /// pub/sub connection; the thread exits when the subscription is dropped
    /// and the next message arrives, or when the connection fails.
    pub fn subscribe(&self, exchange: &str) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let exchange = exchange.to_string();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(_) => return,
            };

            let mut pubsub = conn.as_pubsub();
            if pubsub.subscribe(&exchange).is_err() {
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let delivery = Delivery {
                    exchange: msg.get_channel_name().to_string(),
                    routing_key: String::new(),
                    body: msg.get_payload_bytes().to_vec(),
                };

                if tx.send(delivery).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    type Channel = RedisChannel;

    async fn channel(&self) -> Result<RedisChannel, BrokerError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(RedisChannel {
            conn,
            registry: self.registry.clone(),
        })
    }
}

pub struct RedisChannel {
    conn: MultiplexedConnection,
    registry: String,
}

impl core::fmt::Debug for RedisChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisChannel")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerChannel for RedisChannel {
    type Exchange = RedisExchange;

    async fn declare_fanout(&self, name: &str, durable: bool) -> Result<RedisExchange, BrokerError> {
        let mut conn = self.conn.clone();
        let wanted = durability(durable);

        let _: bool = conn
            .hset_nx(&self.registry, name, wanted)
            .await
            .map_err(|e| BrokerError::Declare(e.to_string()))?;
        let recorded: Option<String> = conn
            .hget(&self.registry, name)
            .await
            .map_err(|e| BrokerError::Declare(e.to_string()))?;

        match recorded.as_deref() {
            Some(existing) if existing != wanted => Err(BrokerError::Declare(format!(
                "exchange '{name}' already declared as {existing}"
            ))),
            _ => Ok(RedisExchange {
                conn: self.conn.clone(),
                name: name.to_string(),
            }),
        }
    }
}

/// Handle to a Redis pub/sub channel. Cheap to clone; clones share the
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisExchange {
    conn: MultiplexedConnection,
    name: String,
}

impl core::fmt::Debug for RedisExchange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisExchange")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Exchange for RedisExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, _routing_key: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn
            .publish(&self.name, body)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }
}
