//! Dead-letter tracer
//!
//! Locates a message by id in the broker's dead-letter queues and rebuilds
//! its delivery path from the death metadata the broker attached to it.
//! Each call opens its own channel and closes it before returning, whatever
//! the outcome. Scans check their cancellation token before every queue
//! they touch; a cancelled call returns `Cancelled` and publishes nothing
//! it had not already committed to.

mod death;

pub use death::{is_death_header, DeadLetterDetails, DeathChain, DeathRecord};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broker::{Broker, BrokerMessage, Channel, OutboundMessage},
    config::TracerConfig,
    topology::{FieldTable, Topology},
    Error, Result,
};

/// Reconstructed history of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTrace {
    pub message_id: String,
    /// Most recent first, as the broker records them
    pub exchanges_visited: Vec<String>,
    /// Most recent first
    pub queues_visited: Vec<String>,
    /// Queue the message currently sits on
    pub final_queue: Option<String>,
    pub was_dead_lettered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_details: Option<DeadLetterDetails>,
}

/// A message sitting on a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetteredMessage {
    pub message_id: Option<String>,
    pub source_queue: String,
    #[serde(flatten)]
    pub details: DeadLetterDetails,
    pub headers: FieldTable,
    pub body: Vec<u8>,
}

impl DeadLetteredMessage {
    fn decode(source_queue: &str, message: BrokerMessage) -> Self {
        let details = DeathChain::from_headers(&message.headers)
            .details()
            .unwrap_or_default();
        Self {
            message_id: message.message_id,
            source_queue: source_queue.to_string(),
            details,
            headers: message.headers,
            body: message.body,
        }
    }
}

/// Traces, lists and requeues dead-lettered messages.
pub struct DeadLetterTracer {
    broker: Arc<dyn Broker>,
    config: TracerConfig,
}

impl DeadLetterTracer {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: TracerConfig) -> Self {
        Self { broker, config }
    }

    /// Rebuild the path of `message_id`, searching `queue` or every
    /// dead-letter queue, then falling back to the remaining live queues.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no scanned queue holds the message, or `queue` does
    ///   not exist
    /// - `Broker` on broker I/O failure
    /// - `Cancelled` if `cancel` fires mid-scan
    pub async fn trace(
        &self,
        message_id: &str,
        queue: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MessageTrace> {
        ensure_active(cancel)?;
        let topology = self.broker.current_topology().await?;
        let candidates = self.dead_letter_queues(&topology, queue)?;

        let channel = self.broker.open_channel().await?;
        let result = trace_on(channel.as_ref(), &topology, &candidates, message_id, cancel).await;
        finish(channel.as_ref(), result).await
    }

    /// Republish a dead-lettered message to the exchange and routing key it
    /// was originally published with, then remove it from its dead-letter
    /// queue. The message id is kept; death headers are dropped.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message is in no dead-letter queue or carries no
    ///   usable death record; nothing is published in that case
    /// - `Broker` on broker I/O failure
    /// - `Cancelled` if `cancel` fires before the republish
    pub async fn requeue(&self, message_id: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let topology = self.broker.current_topology().await?;
        let candidates = self.dead_letter_queues(&topology, None)?;

        let channel = self.broker.open_channel().await?;
        let result = requeue_on(channel.as_ref(), &candidates, message_id, cancel).await;
        finish(channel.as_ref(), result).await
    }

    /// Up to `limit` dead-lettered messages from `queue` or every
    /// dead-letter queue, left in place.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `queue` does not exist
    /// - `Broker` on broker I/O failure
    /// - `Cancelled` if `cancel` fires mid-scan
    pub async fn dead_lettered_messages(
        &self,
        queue: Option<&str>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeadLetteredMessage>> {
        ensure_active(cancel)?;
        let topology = self.broker.current_topology().await?;
        let candidates = self.dead_letter_queues(&topology, queue)?;

        let channel = self.broker.open_channel().await?;
        let result = list_on(channel.as_ref(), &candidates, limit, cancel).await;
        finish(channel.as_ref(), result).await
    }

    /// Queues treated as dead-letter queues.
    fn dead_letter_queues(&self, topology: &Topology, queue: Option<&str>) -> Result<Vec<String>> {
        if let Some(queue) = queue {
            return topology
                .queue(queue)
                .map(|q| vec![q.name.clone()])
                .ok_or_else(|| Error::not_found("queue", queue));
        }

        let suffixes: Vec<String> = self
            .config
            .dead_letter_suffixes
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        Ok(topology
            .queues
            .iter()
            .filter(|q| {
                let name = q.name.to_lowercase();
                q.effective_dead_letter_exchange().is_some()
                    || suffixes.iter().any(|suffix| name.ends_with(suffix))
            })
            .map(|q| q.name.clone())
            .collect())
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled("dead-letter scan".to_string()))
    } else {
        Ok(())
    }
}

/// Look for `message_id` anywhere on `queue`, reading it to its current depth.
async fn find_in(
    channel: &dyn Channel,
    queue: &str,
    message_id: &str,
    cancel: &CancellationToken,
) -> Result<Option<BrokerMessage>> {
    ensure_active(cancel)?;
    let depth = channel.queue_depth(queue).await?;
    if depth == 0 {
        return Ok(None);
    }
    ensure_active(cancel)?;
    let scanned = channel.peek_many(queue, depth).await?;
    debug!(queue, depth, scanned = scanned.len(), "Scanned queue");
    Ok(scanned.into_iter().find(|m| m.has_id(message_id)))
}

async fn trace_on(
    channel: &dyn Channel,
    topology: &Topology,
    candidates: &[String],
    message_id: &str,
    cancel: &CancellationToken,
) -> Result<MessageTrace> {
    for queue in candidates {
        if let Some(message) = find_in(channel, queue, message_id, cancel).await? {
            let chain = DeathChain::from_headers(&message.headers);
            return Ok(MessageTrace {
                message_id: message_id.to_string(),
                exchanges_visited: chain.exchanges_visited(),
                queues_visited: chain.queues_visited(),
                final_queue: Some(queue.clone()),
                was_dead_lettered: true,
                dead_letter_details: chain.details(),
            });
        }
    }

    let live = topology
        .queues
        .iter()
        .filter(|q| !candidates.contains(&q.name));
    for queue in live {
        if let Some(message) = find_in(channel, &queue.name, message_id, cancel).await? {
            let first = |key: &str| {
                message
                    .headers
                    .get_str(key)
                    .map(|v| vec![v.to_string()])
                    .unwrap_or_default()
            };
            return Ok(MessageTrace {
                message_id: message_id.to_string(),
                exchanges_visited: first(death::FIRST_DEATH_EXCHANGE),
                queues_visited: first(death::FIRST_DEATH_QUEUE),
                final_queue: Some(queue.name.clone()),
                was_dead_lettered: false,
                dead_letter_details: None,
            });
        }
    }

    Err(Error::not_found("message", message_id))
}

async fn requeue_on(
    channel: &dyn Channel,
    candidates: &[String],
    message_id: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    for queue in candidates {
        let Some(message) = find_in(channel, queue, message_id, cancel).await? else {
            continue;
        };
        let chain = DeathChain::from_headers(&message.headers);
        let Some((exchange, routing_key)) = chain
            .latest()
            .filter(|d| !d.exchange.is_empty())
            .and_then(|d| Some((d.exchange.clone(), d.first_routing_key()?.to_string())))
        else {
            return Err(Error::not_found(
                "original destination of message",
                message_id,
            ));
        };

        ensure_active(cancel)?;
        let republished = OutboundMessage::new(message.body)
            .with_message_id(message_id)
            .with_headers(message.headers.without(is_death_header));
        channel.publish(&exchange, &routing_key, republished).await?;

        // Once published, the original is removed even if cancelled meanwhile.
        if !channel.remove(queue, message_id).await? {
            warn!(message_id, queue = %queue, "Requeued message was already gone from its queue");
        }
        info!(
            message_id,
            queue = %queue,
            exchange = %exchange,
            routing_key = %routing_key,
            "Requeued dead-lettered message"
        );
        return Ok(());
    }

    Err(Error::not_found("dead-lettered message", message_id))
}

async fn list_on(
    channel: &dyn Channel,
    candidates: &[String],
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<DeadLetteredMessage>> {
    let mut messages = Vec::new();
    for queue in candidates {
        let remaining = limit.saturating_sub(messages.len());
        if remaining == 0 {
            break;
        }
        ensure_active(cancel)?;
        let batch = channel.peek_many(queue, remaining).await?;
        messages.extend(
            batch
                .into_iter()
                .map(|m| DeadLetteredMessage::decode(queue, m)),
        );
    }
    Ok(messages)
}

/// Close `channel`, then surface the body's error before any close error.
async fn finish<T>(channel: &dyn Channel, result: Result<T>) -> Result<T> {
    let closed = channel.close().await;
    let value = result?;
    closed?;
    Ok(value)
}
