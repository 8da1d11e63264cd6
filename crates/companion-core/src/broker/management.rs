//! RabbitMQ management HTTP API broker
//!
//! Uses the management plugin's REST endpoints under `/api`:
//! - `GET exchanges|queues|bindings/{vhost}` for topology snapshots
//! - `GET health/checks/alarms` for health
//! - `POST exchanges/{vhost}/{name}/publish` and `POST queues/{vhost}/{name}/get`
//!   for channel operations, with payloads travelling base64-encoded
//!
//! The HTTP API has no per-message delete. [`Channel::remove`] first peeks to
//! locate the target, then walks the head of the queue: each message ahead of
//! the target is copied to the tail with its original properties before it is
//! acknowledged, so a failed copy never loses a message. The copies are
//! published through the default exchange, which rotates queue order and
//! resets the recorded exchange and routing key.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{Broker, BrokerMessage, Channel, OutboundMessage};
use crate::{
    config::BrokerConfig,
    topology::{
        Binding, DestinationType, Exchange, ExchangeType, FieldTable, Queue, Topology,
        DEAD_LETTER_EXCHANGE, DEAD_LETTER_ROUTING_KEY, MAX_LENGTH, MESSAGE_TTL,
    },
    Error, Result,
};

/// Name the management API uses for the nameless default exchange.
const DEFAULT_EXCHANGE: &str = "amq.default";

// ═══════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ApiExchange {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    auto_delete: bool,
    #[serde(default)]
    internal: bool,
    #[serde(default)]
    arguments: FieldTable,
}

#[derive(Debug, Deserialize)]
struct ApiQueue {
    name: String,
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    exclusive: bool,
    #[serde(default)]
    auto_delete: bool,
    #[serde(default)]
    arguments: FieldTable,
}

#[derive(Debug, Deserialize)]
struct ApiQueueDepth {
    #[serde(default)]
    messages: usize,
}

#[derive(Debug, Deserialize)]
struct ApiBinding {
    source: String,
    destination: String,
    destination_type: String,
    #[serde(default)]
    routing_key: String,
    #[serde(default)]
    arguments: FieldTable,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    properties: serde_json::Value,
    routing_key: &'a str,
    payload: String,
    payload_encoding: String,
}

impl<'a> PublishRequest<'a> {
    fn from_outbound(routing_key: &'a str, message: &OutboundMessage) -> Result<Self> {
        let mut properties = serde_json::Map::new();
        properties.insert("delivery_mode".into(), 2.into());
        if let Some(id) = &message.message_id {
            properties.insert("message_id".into(), id.clone().into());
        }
        if !message.headers.is_empty() {
            properties.insert("headers".into(), serde_json::to_value(&message.headers)?);
        }
        Ok(Self {
            properties: serde_json::Value::Object(properties),
            routing_key,
            payload: base64::engine::general_purpose::STANDARD.encode(&message.body),
            payload_encoding: "base64".to_string(),
        })
    }

    /// Republish a fetched message byte for byte, properties included.
    fn copy_of(routing_key: &'a str, message: &ApiMessage) -> Self {
        let properties = if message.properties.is_object() {
            message.properties.clone()
        } else {
            serde_json::Value::Object(serde_json::Map::new())
        };
        let payload_encoding = if message.payload_encoding.is_empty() {
            "string".to_string()
        } else {
            message.payload_encoding.clone()
        };
        Self {
            properties,
            routing_key,
            payload: message.payload.clone(),
            payload_encoding,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    routed: bool,
}

#[derive(Debug, Serialize)]
struct GetRequest {
    count: usize,
    ackmode: &'static str,
    encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    payload: String,
    #[serde(default)]
    payload_encoding: String,
    /// An empty property set arrives as `[]` rather than `{}`
    #[serde(default)]
    properties: serde_json::Value,
    #[serde(default)]
    exchange: String,
    #[serde(default)]
    routing_key: String,
    #[serde(default)]
    redelivered: bool,
}

impl ApiMessage {
    fn message_id(&self) -> Option<&str> {
        self.properties
            .get("message_id")
            .and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

fn parse_exchange_type(kind: &str) -> Result<ExchangeType> {
    ExchangeType::from_str(kind)
        .map_err(|_| Error::ParseError(format!("Unknown exchange type: {kind}")))
}

fn exchange_from_api(api: ApiExchange) -> Result<Exchange> {
    Ok(Exchange {
        exchange_type: parse_exchange_type(&api.kind)?,
        durable: api.durable,
        auto_delete: api.auto_delete,
        internal: api.internal,
        arguments: api.arguments,
        ..Exchange::new(api.name, ExchangeType::Direct)
    })
}

/// Lift the well-known queue arguments into typed fields.
fn queue_from_api(api: ApiQueue) -> Queue {
    let args = &api.arguments;
    Queue {
        durable: api.durable,
        exclusive: api.exclusive,
        auto_delete: api.auto_delete,
        max_length: args.get_i64(MAX_LENGTH),
        message_ttl: args.get_i64(MESSAGE_TTL),
        dead_letter_exchange: args.get_str(DEAD_LETTER_EXCHANGE).map(String::from),
        dead_letter_routing_key: args.get_str(DEAD_LETTER_ROUTING_KEY).map(String::from),
        arguments: api.arguments,
        ..Queue::new(api.name)
    }
}

fn binding_from_api(api: ApiBinding) -> Binding {
    let destination_type = if api.destination_type == "exchange" {
        DestinationType::Exchange
    } else {
        DestinationType::Queue
    };
    Binding {
        destination_type,
        arguments: api.arguments,
        ..Binding::new(api.source, api.destination, api.routing_key)
    }
}

fn message_from_api(api: ApiMessage) -> Result<BrokerMessage> {
    let message_id = api.message_id().map(String::from);
    let body = if api.payload_encoding == "base64" {
        base64::engine::general_purpose::STANDARD
            .decode(api.payload.as_bytes())
            .map_err(|e| Error::ParseError(format!("Invalid base64 payload: {e}")))?
    } else {
        api.payload.into_bytes()
    };
    let headers = match api.properties.get("headers") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => FieldTable::new(),
    };
    Ok(BrokerMessage {
        message_id,
        exchange: api.exchange,
        routing_key: api.routing_key,
        headers,
        body,
        redelivered: api.redelivered,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Api {
    client: Client,
    base_url: String,
    vhost: String,
    username: String,
    password: String,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        trace!(path, "GET management API");
        let response = self
            .client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::decode(path, response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        trace!(path, "POST management API");
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::broker(format!(
                "management API {path} failed: HTTP {status} - {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::ParseError(format!("Failed to parse {path} response: {e}")))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: &OutboundMessage) -> Result<()> {
        let request = PublishRequest::from_outbound(routing_key, message)?;
        self.send_publish(exchange, &request).await
    }

    async fn send_publish(&self, exchange: &str, request: &PublishRequest<'_>) -> Result<()> {
        let exchange = if exchange.is_empty() {
            DEFAULT_EXCHANGE
        } else {
            exchange
        };
        let path = format!(
            "exchanges/{}/{}/publish",
            self.vhost,
            urlencoding::encode(exchange)
        );
        let response: PublishResponse = self.post(&path, request).await?;
        if !response.routed {
            debug!(exchange, routing_key = request.routing_key, "Message published but not routed");
        }
        Ok(())
    }

    /// Fetch up to `count` messages from the head of `queue`. Without
    /// `consume` they are requeued in place.
    async fn fetch(&self, queue: &str, count: usize, consume: bool) -> Result<Vec<ApiMessage>> {
        let request = GetRequest {
            count,
            ackmode: if consume {
                "ack_requeue_false"
            } else {
                "ack_requeue_true"
            },
            encoding: "base64",
        };
        let path = format!("queues/{}/{}/get", self.vhost, urlencoding::encode(queue));
        self.post(&path, &request).await
    }

    async fn get_messages(&self, queue: &str, count: usize, consume: bool) -> Result<Vec<BrokerMessage>> {
        self.fetch(queue, count, consume)
            .await?
            .into_iter()
            .map(message_from_api)
            .collect()
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize> {
        let path = format!("queues/{}/{}", self.vhost, urlencoding::encode(queue));
        let depth: ApiQueueDepth = self.get(&path).await?;
        Ok(depth.messages)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BROKER
// ═══════════════════════════════════════════════════════════════════════════

/// Broker backed by the management HTTP API.
#[derive(Debug, Clone)]
pub struct ManagementBroker {
    api: Arc<Api>,
}

impl ManagementBroker {
    /// Build a client from broker settings.
    ///
    /// # Errors
    ///
    /// Returns `Broker` if the HTTP client cannot be constructed
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::broker(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            api: Arc::new(Api {
                client,
                base_url: config.management_url.trim_end_matches('/').to_string(),
                vhost: urlencoding::encode(&config.vhost).into_owned(),
                username: config.username.clone(),
                password: config.password.clone(),
            }),
        })
    }
}

#[async_trait]
impl Broker for ManagementBroker {
    async fn current_topology(&self) -> Result<Topology> {
        let vhost = &self.api.vhost;
        let exchanges_path = format!("exchanges/{vhost}");
        let queues_path = format!("queues/{vhost}");
        let bindings_path = format!("bindings/{vhost}");
        let (exchanges, queues, bindings) = futures::try_join!(
            self.api.get::<Vec<ApiExchange>>(&exchanges_path),
            self.api.get::<Vec<ApiQueue>>(&queues_path),
            self.api.get::<Vec<ApiBinding>>(&bindings_path),
        )?;

        let mut topology = Topology::new(format!(
            "Imported from {} at {}",
            self.api.base_url,
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ));
        topology.description = format!("Topology imported from broker at {}", self.api.base_url);
        topology.exchanges = exchanges
            .into_iter()
            .filter(|e| !e.name.is_empty())
            .map(exchange_from_api)
            .collect::<Result<_>>()?;
        topology.queues = queues.into_iter().map(queue_from_api).collect();
        topology.bindings = bindings
            .into_iter()
            .filter(|b| !b.source.is_empty())
            .map(binding_from_api)
            .collect();

        debug!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            bindings = topology.bindings.len(),
            "Fetched broker topology"
        );
        Ok(topology)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .api
            .client
            .get(self.api.url("health/checks/alarms"))
            .basic_auth(&self.api.username, Some(&self.api.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let health: HealthResponse = response.json().await?;
        Ok(health.status == "ok")
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        Ok(Box::new(ManagementChannel {
            api: Arc::clone(&self.api),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ManagementChannel {
    api: Arc<Api>,
    closed: AtomicBool,
}

impl ManagementChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::broker("channel is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for ManagementChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        self.ensure_open()?;
        self.api.publish(exchange, routing_key, &message).await
    }

    async fn peek_or_consume(&self, queue: &str, ack: bool) -> Result<Option<BrokerMessage>> {
        self.ensure_open()?;
        Ok(self.api.get_messages(queue, 1, ack).await?.into_iter().next())
    }

    async fn peek_many(&self, queue: &str, limit: usize) -> Result<Vec<BrokerMessage>> {
        self.ensure_open()?;
        self.api.get_messages(queue, limit, false).await
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize> {
        self.ensure_open()?;
        self.api.queue_depth(queue).await
    }

    async fn remove(&self, queue: &str, message_id: &str) -> Result<bool> {
        self.ensure_open()?;
        let depth = self.api.queue_depth(queue).await?;
        if depth == 0 {
            return Ok(false);
        }
        let peeked = self.api.fetch(queue, depth, false).await?;
        let Some(position) = peeked
            .iter()
            .position(|m| m.message_id() == Some(message_id))
        else {
            return Ok(false);
        };

        for _ in 0..=position {
            let Some(head) = self.api.fetch(queue, 1, false).await?.into_iter().next() else {
                break;
            };
            let is_target = head.message_id() == Some(message_id);
            if !is_target {
                // The copy must land before the original is acknowledged.
                self.api
                    .send_publish("", &PublishRequest::copy_of(queue, &head))
                    .await?;
            }

            let taken = self.api.fetch(queue, 1, true).await?.into_iter().next();
            let taken_id = taken.as_ref().and_then(ApiMessage::message_id);
            if taken_id != head.message_id() {
                warn!(
                    queue,
                    expected = head.message_id().unwrap_or_default(),
                    taken = taken_id.unwrap_or_default(),
                    "Queue head changed while removing a message"
                );
            }
            if is_target && taken_id == Some(message_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vhost_is_path_encoded() -> Result<()> {
        let broker = ManagementBroker::new(&BrokerConfig::default())?;
        assert_eq!(broker.api.vhost, "%2F");
        assert_eq!(urlencoding::encode("orders dlq"), "orders%20dlq");
        Ok(())
    }

    #[test]
    fn test_copy_keeps_original_properties() -> Result<()> {
        let api: ApiMessage = serde_json::from_str(
            r#"{"payload": "aGVsbG8=", "payload_encoding": "base64",
                "properties": {"message_id": "m-7", "content_type": "application/json",
                               "headers": {"tenant": "acme"}},
                "exchange": "orders.x", "routing_key": "order.placed"}"#,
        )?;
        let copy = PublishRequest::copy_of("orders.q", &api);
        assert_eq!(copy.routing_key, "orders.q");
        assert_eq!(copy.payload, "aGVsbG8=");
        assert_eq!(copy.payload_encoding, "base64");
        assert_eq!(copy.properties, api.properties);
        Ok(())
    }

    #[test]
    fn test_copy_of_message_without_properties() -> Result<()> {
        let api: ApiMessage = serde_json::from_str(r#"{"payload": "plain", "properties": []}"#)?;
        let copy = PublishRequest::copy_of("q", &api);
        assert!(copy.properties.is_object());
        assert_eq!(copy.payload_encoding, "string");
        Ok(())
    }

    #[test]
    fn test_plugin_exchange_types() -> Result<()> {
        assert_eq!(parse_exchange_type("x-consistent-hash")?, ExchangeType::ConsistentHash);
        assert_eq!(parse_exchange_type("x-dead-letter")?, ExchangeType::DeadLetter);
        assert!(matches!(
            parse_exchange_type("x-delayed-message"),
            Err(Error::ParseError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_queue_arguments_lifted() -> Result<()> {
        let api: ApiQueue = serde_json::from_str(
            r#"{"name": "orders.q", "durable": true, "arguments": {
                "x-max-length": 500, "x-message-ttl": 60000,
                "x-dead-letter-exchange": "orders.dlx", "x-dead-letter-routing-key": "dead"}}"#,
        )?;
        let queue = queue_from_api(api);
        assert_eq!(queue.max_length, Some(500));
        assert_eq!(queue.message_ttl, Some(60000));
        assert_eq!(queue.dead_letter_exchange.as_deref(), Some("orders.dlx"));
        assert_eq!(queue.dead_letter_routing_key.as_deref(), Some("dead"));
        Ok(())
    }

    #[test]
    fn test_message_decoding() -> Result<()> {
        let api: ApiMessage = serde_json::from_str(
            r#"{"payload": "aGVsbG8=", "payload_encoding": "base64",
                "properties": {"message_id": "m-1", "headers": {"x-death": [
                    {"exchange": "orders.x", "queue": "orders.q", "reason": "rejected", "count": 1}
                ]}},
                "exchange": "orders.dlx", "routing_key": "dead", "redelivered": false}"#,
        )?;
        let message = message_from_api(api)?;
        assert_eq!(message.body, b"hello");
        assert!(message.has_id("m-1"));
        assert!(message.headers.contains_key("x-death"));
        Ok(())
    }

    #[test]
    fn test_empty_properties_array() -> Result<()> {
        let api: ApiMessage =
            serde_json::from_str(r#"{"payload": "plain", "payload_encoding": "string", "properties": []}"#)?;
        let message = message_from_api(api)?;
        assert_eq!(message.body, b"plain");
        assert_eq!(message.message_id, None);
        Ok(())
    }

    #[test]
    fn test_exchange_to_exchange_binding() -> Result<()> {
        let api: ApiBinding = serde_json::from_str(
            r#"{"source": "a", "destination": "b", "destination_type": "exchange", "routing_key": "k"}"#,
        )?;
        assert_eq!(binding_from_api(api).destination_type, DestinationType::Exchange);
        Ok(())
    }
}
