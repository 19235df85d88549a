//! In-memory fan-out broker for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};

use async_trait::async_trait;

use crate::broker::{Broker, BrokerChannel, BrokerError, Delivery, Exchange, Subscription};

/// Broker operation that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerFault {
    Channel,
    Declare,
    Publish,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// Declared exchanges and their durability.
    exchanges: HashMap<String, bool>,
    /// Subscribers per exchange name. Binding may precede declaration.
    bindings: HashMap<String, Vec<mpsc::Sender<Delivery>>>,
    faults: HashSet<BrokerFault>,
    channels_opened: usize,
    declarations: usize,
    publishes: usize,
}

impl BrokerState {
    fn take_fault(&mut self, fault: BrokerFault) -> bool {
        self.faults.remove(&fault)
    }
}

/// In-memory pub/sub broker with fan-out exchanges.
///
/// - No IO
/// - Fan-out to every subscription bound to an exchange
/// - Counts channel opens, declarations and publishes for assertions
/// - One-shot fault injection per operation ([`BrokerFault`])
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.state)
    }

    /// Bind a new subscription to `exchange`.
    pub fn subscribe(&self, exchange: &str) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::channel();
        self.state()
            .bindings
            .entry(exchange.to_string())
            .or_default()
            .push(tx);
        Subscription::new(rx)
    }

    /// Make the next call of the given kind fail.
    pub fn fail_next(&self, fault: BrokerFault) {
        self.state().faults.insert(fault);
    }

    /// Names of declared exchanges, sorted.
    pub fn exchanges(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_durable(&self, exchange: &str) -> Option<bool> {
        self.state().exchanges.get(exchange).copied()
    }

    pub fn channels_opened(&self) -> usize {
        self.state().channels_opened
    }

    /// Number of declaration round-trips (including idempotent re-declarations).
    pub fn declarations(&self) -> usize {
        self.state().declarations
    }

    /// Number of successful publishes.
    pub fn publishes(&self) -> usize {
        self.state().publishes
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    // Counters and bindings stay consistent even if a holder panicked.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn channel(&self) -> Result<InMemoryChannel, BrokerError> {
        let mut state = self.state();
        if state.take_fault(BrokerFault::Channel) {
            return Err(BrokerError::Connection("injected channel failure".to_string()));
        }
        state.channels_opened += 1;
        Ok(InMemoryChannel {
            state: self.state.clone(),
        })
    }
}

/// Channel on an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    type Exchange = InMemoryExchange;

    async fn declare_fanout(&self, name: &str, durable: bool) -> Result<InMemoryExchange, BrokerError> {
        let mut state = lock(&self.state);
        state.declarations += 1;
        if state.take_fault(BrokerFault::Declare) {
            return Err(BrokerError::Declare(format!("injected failure declaring '{name}'")));
        }
        let existing = state.exchanges.get(name).copied();
        match existing {
            Some(existing) if existing != durable => {
                return Err(BrokerError::Declare(format!(
                    "exchange '{name}' already declared with durable={existing}"
                )));
            }
            Some(_) => {}
            None => {
                state.exchanges.insert(name.to_string(), durable);
            }
        }
        Ok(InMemoryExchange {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }
}

/// Exchange handle on an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryExchange {
    name: String,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Exchange for InMemoryExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        if state.take_fault(BrokerFault::Publish) {
            return Err(BrokerError::Publish(format!(
                "injected failure publishing to '{}'",
                self.name
            )));
        }
        state.publishes += 1;

        let delivery = Delivery {
            exchange: self.name.clone(),
            routing_key: routing_key.to_string(),
            body,
        };
        if let Some(subs) = state.bindings.get_mut(&self.name) {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(delivery.clone()).is_ok());
        }
        Ok(())
    }
}
