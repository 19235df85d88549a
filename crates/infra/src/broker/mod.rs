//! Broker adapters for the fan-out emitter.
//!
//! The in-memory broker lives in `shipyard-events`; adapters here talk to real
//! infrastructure.

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::{RedisBroker, RedisChannel, RedisExchange};
