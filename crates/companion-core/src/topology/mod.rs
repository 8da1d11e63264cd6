//! Topology model
//!
//! Pure data: a [`Topology`] aggregate owning [`Exchange`]s, [`Queue`]s and
//! [`Binding`]s. Bindings refer to exchanges and queues by name, so dangling
//! references are representable; catching them is the validator's job.

mod fields;

pub use fields::{
    FieldTable, FieldValue, KnownArgument, ALTERNATE_EXCHANGE, DEAD_LETTER_EXCHANGE,
    DEAD_LETTER_ROUTING_KEY, HASH_HEADER, MAX_LENGTH, MESSAGE_TTL,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const fn yes() -> bool {
    true
}

/// Unique topology identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyId(String);

impl TopologyId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(new_id())
    }

    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TopologyId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for TopologyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EXCHANGE TYPE
// ═══════════════════════════════════════════════════════════════════════════

/// Exchange routing type.
///
/// Parses the broker's wire names, including the plugin types
/// `x-consistent-hash` and `x-dead-letter`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ExchangeType {
    #[serde(rename = "direct")]
    #[strum(to_string = "direct")]
    Direct,
    #[serde(rename = "fanout")]
    #[strum(to_string = "fanout")]
    Fanout,
    #[serde(rename = "topic")]
    #[strum(to_string = "topic")]
    Topic,
    #[serde(rename = "headers")]
    #[strum(to_string = "headers")]
    Headers,
    #[serde(rename = "x-consistent-hash", alias = "consistent-hash")]
    #[strum(to_string = "x-consistent-hash", serialize = "consistent-hash")]
    ConsistentHash,
    #[serde(rename = "x-dead-letter", alias = "dead-letter")]
    #[strum(to_string = "x-dead-letter", serialize = "dead-letter")]
    DeadLetter,
}

/// What a binding's destination names.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DestinationType {
    #[default]
    Queue,
    Exchange,
}

// ═══════════════════════════════════════════════════════════════════════════
// ENTITIES
// ═══════════════════════════════════════════════════════════════════════════

/// A routing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub exchange_type: ExchangeType,
    #[serde(default = "yes")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "FieldTable::is_empty")]
    pub arguments: FieldTable,
}

impl Exchange {
    /// Durable exchange with no arguments
    #[must_use]
    pub fn new(name: impl Into<String>, exchange_type: ExchangeType) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            exchange_type,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: FieldTable::new(),
        }
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key, value);
        self
    }
}

/// A holding area for messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default = "yes")]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default, skip_serializing_if = "FieldTable::is_empty")]
    pub arguments: FieldTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    /// Per-message TTL in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_routing_key: Option<String>,
}

impl Queue {
    /// Durable queue with no limits and no dead-lettering
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: FieldTable::new(),
            max_length: None,
            message_ttl: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }

    #[must_use]
    pub const fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub const fn with_message_ttl(mut self, ttl_ms: i64) -> Self {
        self.message_ttl = Some(ttl_ms);
        self
    }

    #[must_use]
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: Option<&str>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = routing_key.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key, value);
        self
    }

    /// Dead-letter exchange from the typed field, falling back to the raw argument.
    #[must_use]
    pub fn effective_dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.arguments.get_str(DEAD_LETTER_EXCHANGE))
    }

    #[must_use]
    pub fn effective_dead_letter_routing_key(&self) -> Option<&str> {
        self.dead_letter_routing_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.arguments.get_str(DEAD_LETTER_ROUTING_KEY))
    }

    #[must_use]
    pub fn effective_max_length(&self) -> Option<i64> {
        self.max_length
            .or_else(|| self.arguments.get_i64(MAX_LENGTH))
    }
}

/// A routing relationship from an exchange to a queue or another exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default = "new_id")]
    pub id: String,
    pub source_exchange: String,
    /// Destination queue name, or exchange name when `destination_type` is `exchange`
    #[serde(alias = "destination_queue")]
    pub destination: String,
    #[serde(default)]
    pub destination_type: DestinationType,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default, skip_serializing_if = "FieldTable::is_empty")]
    pub arguments: FieldTable,
}

impl Binding {
    /// Exchange-to-queue binding
    #[must_use]
    pub fn new(
        source_exchange: impl Into<String>,
        destination_queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            source_exchange: source_exchange.into(),
            destination: destination_queue.into(),
            destination_type: DestinationType::Queue,
            routing_key: routing_key.into(),
            arguments: FieldTable::new(),
        }
    }

    /// Exchange-to-exchange binding
    #[must_use]
    pub fn to_exchange(
        source_exchange: impl Into<String>,
        destination_exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            destination_type: DestinationType::Exchange,
            ..Self::new(source_exchange, destination_exchange, routing_key)
        }
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key, value);
        self
    }

    #[must_use]
    pub fn targets_queue(&self) -> bool {
        self.destination_type == DestinationType::Queue
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOPOLOGY
// ═══════════════════════════════════════════════════════════════════════════

/// Aggregate root of exchanges, queues and bindings.
///
/// The identifier is fixed at construction; everything else is replaced
/// wholesale by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    id: TopologyId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub queues: Vec<Queue>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FieldTable>,
}

impl Topology {
    /// Empty topology with a fresh identifier
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(TopologyId::generate(), name)
    }

    /// Empty topology with a caller-assigned identifier
    #[must_use]
    pub fn with_id(id: TopologyId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            exchanges: Vec::new(),
            queues: Vec::new(),
            bindings: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TopologyId {
        &self.id
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Queue) -> Self {
        self.queues.push(queue);
        self
    }

    #[must_use]
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<&Exchange> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Bindings whose source is `exchange`
    pub fn bindings_from<'a>(&'a self, exchange: &'a str) -> impl Iterator<Item = &'a Binding> {
        self.bindings
            .iter()
            .filter(move |b| b.source_exchange == exchange)
    }

    /// Bindings delivering into queue `queue`
    pub fn bindings_to_queue<'a>(&'a self, queue: &'a str) -> impl Iterator<Item = &'a Binding> {
        self.bindings
            .iter()
            .filter(move |b| b.targets_queue() && b.destination == queue)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_exchange_type_parses_wire_names() {
        assert_eq!(
            ExchangeType::from_str("x-consistent-hash"),
            Ok(ExchangeType::ConsistentHash)
        );
        assert_eq!(ExchangeType::from_str("TOPIC"), Ok(ExchangeType::Topic));
        assert_eq!(ExchangeType::DeadLetter.to_string(), "x-dead-letter");
        assert!(ExchangeType::from_str("x-delayed-message").is_err());
    }

    #[test]
    fn test_topology_deserializes_with_defaults() -> Result<(), serde_json::Error> {
        let json = r#"{
            "name": "shop",
            "exchanges": [{"name": "orders", "type": "topic"}],
            "queues": [{"name": "orders.created", "max_length": 10}],
            "bindings": [{"source_exchange": "orders", "destination_queue": "orders.created",
                          "routing_key": "orders.*"}]
        }"#;
        let topology: Topology = serde_json::from_str(json)?;

        assert_eq!(topology.exchanges[0].exchange_type, ExchangeType::Topic);
        assert!(topology.exchanges[0].durable);
        assert_eq!(topology.queues[0].max_length, Some(10));
        assert_eq!(topology.bindings[0].destination, "orders.created");
        assert_eq!(topology.bindings[0].destination_type, DestinationType::Queue);
        assert!(!topology.id().as_str().is_empty());
        Ok(())
    }

    #[test]
    fn test_effective_dead_letter_falls_back_to_arguments() {
        let queue = Queue::new("work").with_argument(DEAD_LETTER_EXCHANGE, "work.dlx");
        assert_eq!(queue.effective_dead_letter_exchange(), Some("work.dlx"));

        let typed = Queue::new("work").with_dead_letter("typed.dlx", None);
        assert_eq!(typed.effective_dead_letter_exchange(), Some("typed.dlx"));
    }

    #[test]
    fn test_binding_lookups() {
        let topology = Topology::new("t")
            .with_binding(Binding::new("a", "q1", "k"))
            .with_binding(Binding::to_exchange("a", "b", "k"))
            .with_binding(Binding::new("b", "q1", "k"));

        assert_eq!(topology.bindings_from("a").count(), 2);
        assert_eq!(topology.bindings_to_queue("q1").count(), 2);
        assert_eq!(topology.bindings_to_queue("b").count(), 0);
    }
}
