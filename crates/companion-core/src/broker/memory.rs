//! In-process broker that routes through a declared topology.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Broker, BrokerMessage, Channel, OutboundMessage};
use crate::{
    rules,
    topology::{ExchangeType, FieldTable, FieldValue, Topology},
    Error, Result,
};

#[derive(Debug)]
struct State {
    topology: Topology,
    queues: BTreeMap<String, VecDeque<BrokerMessage>>,
    published: usize,
    fail_publishes_after: Option<usize>,
    healthy: bool,
    open_channels: usize,
    opened_channels: usize,
    close_delay: Option<Duration>,
}

impl State {
    fn new(topology: Topology) -> Self {
        let queues = topology
            .queues
            .iter()
            .map(|q| (q.name.clone(), VecDeque::new()))
            .collect();
        Self {
            topology,
            queues,
            published: 0,
            fail_publishes_after: None,
            healthy: true,
            open_channels: 0,
            opened_channels: 0,
            close_delay: None,
        }
    }

    fn queue_mut(&mut self, queue: &str) -> Result<&mut VecDeque<BrokerMessage>> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| Error::broker(format!("NOT_FOUND - no queue '{queue}'")))
    }

    /// Queues a publication to `exchange` with `routing_key` reaches.
    fn route(&self, exchange: &str, routing_key: &str, headers: &FieldTable) -> Result<BTreeSet<String>> {
        let mut targets = BTreeSet::new();
        if exchange.is_empty() {
            if self.queues.contains_key(routing_key) {
                targets.insert(routing_key.to_string());
            }
            return Ok(targets);
        }
        if self.topology.exchange(exchange).is_none() {
            return Err(Error::broker(format!("NOT_FOUND - no exchange '{exchange}'")));
        }

        let mut visited = BTreeSet::new();
        let mut pending = vec![exchange.to_string()];
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(source) = self.topology.exchange(&current) else {
                continue;
            };
            let matching: Vec<_> = self
                .topology
                .bindings_from(&current)
                .filter(|b| match source.exchange_type {
                    ExchangeType::Direct => b.routing_key == routing_key,
                    ExchangeType::Topic => rules::topic_matches(&b.routing_key, routing_key),
                    ExchangeType::Headers => headers_match(&b.arguments, headers),
                    ExchangeType::Fanout
                    | ExchangeType::DeadLetter
                    | ExchangeType::ConsistentHash => true,
                })
                .collect();
            // Single target; a real ring would hash on the configured header.
            let matching = if source.exchange_type == ExchangeType::ConsistentHash {
                matching.into_iter().take(1).collect()
            } else {
                matching
            };

            for binding in matching {
                if binding.targets_queue() {
                    targets.insert(binding.destination.clone());
                } else {
                    pending.push(binding.destination.clone());
                }
            }
        }
        Ok(targets)
    }
}

fn headers_match(arguments: &FieldTable, headers: &FieldTable) -> bool {
    let match_any = arguments
        .get_str("x-match")
        .is_some_and(|mode| mode.starts_with("any"));
    let mut required = arguments.iter().filter(|(key, _)| !key.starts_with("x-"));
    let matches = |(key, value): (&String, &FieldValue)| headers.get(key) == Some(value);

    if match_any {
        required.any(matches)
    } else {
        required.all(matches)
    }
}

/// In-memory broker with per-queue FIFO storage.
///
/// Cloning shares the same broker state.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    concurrent_channels: bool,
}

impl InMemoryBroker {
    /// Broker holding `topology`, with one empty queue per declared queue.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(topology))),
            concurrent_channels: true,
        }
    }

    /// Channels from this broker report that they need external serialization.
    #[must_use]
    pub const fn with_serialized_channels(mut self) -> Self {
        self.concurrent_channels = false;
        self
    }

    /// Place a message directly on `queue`, bypassing routing.
    pub async fn enqueue(&self, queue: &str, message: BrokerMessage) -> Result<()> {
        self.state.lock().await.queue_mut(queue)?.push_back(message);
        Ok(())
    }

    /// Snapshot of the messages on `queue`, head first.
    pub async fn messages(&self, queue: &str) -> Vec<BrokerMessage> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Successful publishes since creation.
    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published
    }

    /// Every publish after the first `count` successful ones fails.
    pub async fn fail_publishes_after(&self, count: usize) {
        self.state.lock().await.fail_publishes_after = Some(count);
    }

    pub async fn set_healthy(&self, healthy: bool) {
        self.state.lock().await.healthy = healthy;
    }

    /// Channels opened and not yet closed.
    pub async fn open_channel_count(&self) -> usize {
        self.state.lock().await.open_channels
    }

    /// Channels opened since creation.
    pub async fn opened_channel_count(&self) -> usize {
        self.state.lock().await.opened_channels
    }

    /// Channels wait `delay` before closing.
    pub async fn delay_channel_close(&self, delay: Duration) {
        self.state.lock().await.close_delay = Some(delay);
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn current_topology(&self) -> Result<Topology> {
        Ok(self.state.lock().await.topology.clone())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.state.lock().await.healthy)
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        let mut state = self.state.lock().await;
        state.open_channels += 1;
        state.opened_channels += 1;
        Ok(Box::new(InMemoryChannel {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            concurrent: self.concurrent_channels,
        }))
    }
}

struct InMemoryChannel {
    state: Arc<Mutex<State>>,
    closed: AtomicBool,
    concurrent: bool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::broker("channel is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        if state
            .fail_publishes_after
            .is_some_and(|limit| state.published >= limit)
        {
            return Err(Error::broker(format!(
                "publish to '{exchange}' rejected by broker"
            )));
        }

        let targets = state.route(exchange, routing_key, &message.headers)?;
        if let Some(missing) = targets.iter().find(|t| !state.queues.contains_key(*t)) {
            return Err(Error::broker(format!("NOT_FOUND - no queue '{missing}'")));
        }
        let delivered = BrokerMessage {
            message_id: message.message_id,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            headers: message.headers,
            body: message.body,
            redelivered: false,
        };
        for target in targets {
            state.queue_mut(&target)?.push_back(delivered.clone());
        }
        state.published += 1;
        Ok(())
    }

    async fn peek_or_consume(&self, queue: &str, ack: bool) -> Result<Option<BrokerMessage>> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let messages = state.queue_mut(queue)?;
        Ok(if ack {
            messages.pop_front()
        } else {
            messages.front().cloned()
        })
    }

    async fn peek_many(&self, queue: &str, limit: usize) -> Result<Vec<BrokerMessage>> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        Ok(state.queue_mut(queue)?.iter().take(limit).cloned().collect())
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.state.lock().await.queue_mut(queue)?.len())
    }

    async fn remove(&self, queue: &str, message_id: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let messages = state.queue_mut(queue)?;
        Ok(messages
            .iter()
            .position(|m| m.has_id(message_id))
            .and_then(|index| messages.remove(index))
            .is_some())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let delay = self.state.lock().await.close_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state.lock().await;
            state.open_channels = state.open_channels.saturating_sub(1);
        }
        Ok(())
    }

    fn supports_concurrent_use(&self) -> bool {
        self.concurrent
    }
}
