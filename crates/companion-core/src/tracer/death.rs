//! Death-chain decoding
//!
//! A broker attaches an `x-death` header to every dead-lettered message: a
//! list of tables, most recent event first, each shaped like
//! `{exchange, queue, reason, routing-keys, count, time}`. Requeued copies
//! and messages still on a live queue may instead carry only the
//! `x-first-death-*` / `x-last-death-*` summary headers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topology::{FieldTable, FieldValue};

pub const DEATH_HEADER: &str = "x-death";
pub const FIRST_DEATH_EXCHANGE: &str = "x-first-death-exchange";
pub const FIRST_DEATH_QUEUE: &str = "x-first-death-queue";

/// Whether `key` is broker-written death metadata.
#[must_use]
pub fn is_death_header(key: &str) -> bool {
    key == DEATH_HEADER || key.starts_with("x-first-death-") || key.starts_with("x-last-death-")
}

/// One rejection or expiry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathRecord {
    pub exchange: String,
    pub queue: String,
    pub reason: String,
    pub routing_keys: Vec<String>,
    pub count: u64,
    pub time: Option<DateTime<Utc>>,
}

impl DeathRecord {
    fn from_table(table: &FieldTable) -> Self {
        let text = |key: &str| table.get_str(key).unwrap_or_default().to_string();
        let routing_keys = table
            .get("routing-keys")
            .and_then(FieldValue::as_list)
            .map(|keys| {
                keys.iter()
                    .filter_map(FieldValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            exchange: text("exchange"),
            queue: text("queue"),
            reason: text("reason"),
            routing_keys,
            count: table
                .get_i64("count")
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(1),
            time: table.get("time").and_then(parse_time),
        }
    }

    #[must_use]
    pub fn first_routing_key(&self) -> Option<&str> {
        self.routing_keys.first().map(String::as_str)
    }
}

/// Epoch seconds (AMQP timestamp) or an RFC 3339 string.
fn parse_time(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Str(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| s.trim().parse().ok().and_then(|secs| DateTime::from_timestamp(secs, 0))),
        other => other
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

/// Decoded `x-death` list, most recent event first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeathChain(Vec<DeathRecord>);

impl DeathChain {
    /// Decode the chain from message headers. Entries that are not tables
    /// are skipped.
    #[must_use]
    pub fn from_headers(headers: &FieldTable) -> Self {
        let records = headers
            .get(DEATH_HEADER)
            .and_then(FieldValue::as_list)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(FieldValue::as_table)
                    .map(DeathRecord::from_table)
                    .collect()
            })
            .unwrap_or_default();
        Self(records)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&DeathRecord> {
        self.0.first()
    }

    /// Events in wire order, most recent first.
    pub fn records(&self) -> impl Iterator<Item = &DeathRecord> {
        self.0.iter()
    }

    /// Exchanges named by each event, most recent first, repeats kept.
    #[must_use]
    pub fn exchanges_visited(&self) -> Vec<String> {
        self.records().map(|d| d.exchange.clone()).collect()
    }

    /// Queues named by each event, most recent first, repeats kept.
    #[must_use]
    pub fn queues_visited(&self) -> Vec<String> {
        self.records().map(|d| d.queue.clone()).collect()
    }

    /// Sum of per-entry `count`s.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.0.iter().map(|d| d.count).sum()
    }

    /// Summary drawn from the most recent event.
    #[must_use]
    pub fn details(&self) -> Option<DeadLetterDetails> {
        self.latest().map(|latest| DeadLetterDetails {
            reason: latest.reason.clone(),
            original_exchange: latest.exchange.clone(),
            original_routing_key: latest.first_routing_key().unwrap_or_default().to_string(),
            death_count: self.total_count(),
            dead_lettered_at: latest.time,
        })
    }
}

/// Why and from where a message was dead-lettered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterDetails {
    pub reason: String,
    pub original_exchange: String,
    pub original_routing_key: String,
    pub death_count: u64,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}
