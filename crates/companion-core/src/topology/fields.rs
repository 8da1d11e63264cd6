//! Typed broker argument and header values.
//!
//! Broker arguments (`x-max-length`, `hash-header`, ...), message headers and
//! death-chain entries all travel as AMQP field tables. They are modelled as a
//! tagged union ([`FieldValue`]) inside an ordered map ([`FieldTable`]) so that
//! iteration order, and therefore every report built from them, is deterministic.
//!
//! Well-known keys are classified by [`KnownArgument`] and read narrowly at the
//! point of use; everything else stays in the [`KnownArgument::Opaque`] bucket.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Queue argument naming the dead-letter exchange.
pub const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the dead-letter routing key.
pub const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument bounding the number of ready messages.
pub const MAX_LENGTH: &str = "x-max-length";
/// Queue argument setting the per-message TTL in milliseconds.
pub const MESSAGE_TTL: &str = "x-message-ttl";
/// Consistent-hash exchange argument naming the header to hash on.
pub const HASH_HEADER: &str = "hash-header";
/// Exchange argument naming the alternate exchange for unroutable messages.
pub const ALTERNATE_EXCHANGE: &str = "alternate-exchange";

/// A single AMQP field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FieldValue>),
    Table(FieldTable),
}

impl FieldValue {
    /// String view, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view. Floats with no fractional part and numeric strings are accepted,
    /// since the management API is loose about numeric encodings.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_table(&self) -> Option<&FieldTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<FieldTable> for FieldValue {
    fn from(value: FieldTable) -> Self {
        Self::Table(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Table(table) => write!(f, "{{{} entries}}", table.len()),
        }
    }
}

/// Ordered map of field values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTable(BTreeMap<String, FieldValue>);

impl FieldTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Non-empty string value under `key`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(FieldValue::as_str)
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_i64)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Copy of this table without the entries for which `drop` returns true.
    #[must_use]
    pub fn without(&self, drop: impl Fn(&str) -> bool) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !drop(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Classify every entry into a [`KnownArgument`].
    pub fn known(&self) -> impl Iterator<Item = KnownArgument> + '_ {
        self.0
            .iter()
            .map(|(key, value)| KnownArgument::classify(key, value))
    }
}

impl FromIterator<(String, FieldValue)> for FieldTable {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Well-known broker arguments, with everything else kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum KnownArgument {
    DeadLetterExchange(String),
    DeadLetterRoutingKey(String),
    MaxLength(i64),
    MessageTtl(i64),
    HashHeader(String),
    AlternateExchange(String),
    Opaque { key: String, value: FieldValue },
}

impl KnownArgument {
    /// Classify a single entry. A well-known key whose value has the wrong
    /// shape stays opaque rather than being coerced.
    #[must_use]
    pub fn classify(key: &str, value: &FieldValue) -> Self {
        let string = || value.as_str().map(str::to_string);
        let known = match key {
            DEAD_LETTER_EXCHANGE => string().map(Self::DeadLetterExchange),
            DEAD_LETTER_ROUTING_KEY => string().map(Self::DeadLetterRoutingKey),
            MAX_LENGTH => value.as_i64().map(Self::MaxLength),
            MESSAGE_TTL => value.as_i64().map(Self::MessageTtl),
            HASH_HEADER => string().map(Self::HashHeader),
            ALTERNATE_EXCHANGE => string().map(Self::AlternateExchange),
            _ => None,
        };
        known.unwrap_or_else(|| Self::Opaque {
            key: key.to_string(),
            value: value.clone(),
        })
    }
}
