//! Canonical per-exchange-type rules and routing-key grammars.
//!
//! Both the validator and the analyzer read binding constraints from
//! [`binding_rule`], so a rule change lands in one place.

use std::sync::LazyLock;

use regex::Regex;

use crate::topology::ExchangeType;

/// AMQP short-string limit for routing keys.
pub const MAX_ROUTING_KEY_BYTES: usize = 255;

static NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_.]+$").ok());

/// What a binding's routing key must look like for a given exchange type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// Non-empty key required
    Required,
    /// Key must be empty
    Forbidden,
    /// No constraint
    Free,
}

/// What a binding's argument map must look like for a given exchange type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentRule {
    Required,
    Free,
}

/// Binding constraints for one exchange type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRule {
    pub routing_key: KeyRule,
    pub arguments: ArgumentRule,
    /// Whether `*` and `#` carry wildcard meaning in routing keys
    pub wildcards: bool,
}

/// The rule table.
#[must_use]
pub const fn binding_rule(exchange_type: ExchangeType) -> BindingRule {
    let (routing_key, arguments, wildcards) = match exchange_type {
        ExchangeType::Direct => (KeyRule::Required, ArgumentRule::Free, false),
        ExchangeType::Fanout => (KeyRule::Forbidden, ArgumentRule::Free, false),
        ExchangeType::Topic => (KeyRule::Free, ArgumentRule::Free, true),
        ExchangeType::Headers => (KeyRule::Free, ArgumentRule::Required, false),
        ExchangeType::ConsistentHash | ExchangeType::DeadLetter => {
            (KeyRule::Free, ArgumentRule::Free, false)
        }
    };
    BindingRule {
        routing_key,
        arguments,
        wildcards,
    }
}

/// Exchange and queue names: letters, digits, `-`, `_` and `.`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.as_ref().is_some_and(|re| re.is_match(name))
}

#[must_use]
pub fn has_wildcard(routing_key: &str) -> bool {
    routing_key.contains(['*', '#'])
}

/// Dot-separated segments, each a word (`[A-Za-z0-9_-]+`), `*` or `#`.
///
/// Empty segments are rejected, and so is `##` since it is not a segment.
#[must_use]
pub fn is_valid_topic_pattern(pattern: &str) -> bool {
    !pattern.is_empty()
        && pattern.split('.').all(|segment| {
            segment == "*"
                || segment == "#"
                || (!segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-')))
        })
}

/// Topic routing: `*` matches exactly one segment, `#` zero or more.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            (0..=key.len()).any(|skip| key.get(skip..).is_some_and(|k| match_segments(rest, k)))
        }
        Some((&"*", rest)) => key
            .split_first()
            .is_some_and(|(_, key_rest)| match_segments(rest, key_rest)),
        Some((segment, rest)) => key
            .split_first()
            .is_some_and(|(head, key_rest)| head == segment && match_segments(rest, key_rest)),
    }
}
