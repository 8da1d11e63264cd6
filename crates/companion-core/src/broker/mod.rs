//! Broker access collaborators
//!
//! The engine never talks to a broker directly; it goes through two traits:
//!
//! - [`Broker`]: connection-level operations (topology snapshot, health, channels)
//! - [`Channel`]: a session used for publishing and inspecting queues
//!
//! Implementations:
//! - [`InMemoryBroker`]: routes publications through a declared topology; used by
//!   tests and dry runs
//! - [`ManagementBroker`]: RabbitMQ management HTTP API

mod management;
mod memory;

pub use management::ManagementBroker;
pub use memory::InMemoryBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    topology::{FieldTable, Topology},
    Result,
};

/// A message handed to [`Channel::publish`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: Option<String>,
    #[serde(default)]
    pub headers: FieldTable,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: None,
            headers: FieldTable::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: FieldTable) -> Self {
        self.headers = headers;
        self
    }
}

/// A message read from a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message_id: Option<String>,
    /// Exchange the message was last published to
    pub exchange: String,
    pub routing_key: String,
    #[serde(default)]
    pub headers: FieldTable,
    pub body: Vec<u8>,
    #[serde(default)]
    pub redelivered: bool,
}

impl BrokerMessage {
    /// Whether this message carries `message_id`.
    #[must_use]
    pub fn has_id(&self, message_id: &str) -> bool {
        self.message_id.as_deref() == Some(message_id)
    }
}

/// Connection-level broker access.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Snapshot of the exchanges, queues and bindings the broker currently holds.
    async fn current_topology(&self) -> Result<Topology>;

    /// `Ok(false)` means reachable but unhealthy; `Err` means unreachable.
    async fn health_check(&self) -> Result<bool>;

    /// Open a new channel. Callers must [`Channel::close`] it when done.
    async fn open_channel(&self) -> Result<Box<dyn Channel>>;
}

/// A broker session.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()>;

    /// Fetch the head of `queue`. With `ack` the message is consumed;
    /// without it the message stays where it was.
    async fn peek_or_consume(&self, queue: &str, ack: bool) -> Result<Option<BrokerMessage>>;

    /// Non-destructive scan of up to `limit` messages from the head of `queue`.
    async fn peek_many(&self, queue: &str, limit: usize) -> Result<Vec<BrokerMessage>>;

    /// Messages currently ready on `queue`.
    async fn queue_depth(&self, queue: &str) -> Result<usize>;

    /// Remove the first message carrying `message_id` from `queue`.
    /// Returns whether a message was removed.
    async fn remove(&self, queue: &str, message_id: &str) -> Result<bool>;

    async fn close(&self) -> Result<()>;

    /// Whether concurrent callers may share this channel without a lock.
    fn supports_concurrent_use(&self) -> bool {
        true
    }
}
