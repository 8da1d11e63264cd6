//! Structural validation of a topology.
//!
//! [`validate`] never fails: every rule runs, violations accumulate as
//! errors or warnings in a [`ValidationReport`], and only errors affect
//! validity. Results depend on the input alone.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    rules::{self, ArgumentRule, KeyRule, MAX_ROUTING_KEY_BYTES},
    topology::{Binding, DestinationType, Exchange, ExchangeType, Queue, Topology, HASH_HEADER},
};

/// Outcome of validating one topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Collector {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Collector {
    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(self) -> ValidationReport {
        ValidationReport {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Validate a topology against broker semantics.
#[must_use]
pub fn validate(topology: &Topology) -> ValidationReport {
    let mut out = Collector::default();

    if topology.name.trim().is_empty() {
        out.error("Topology name is required".to_string());
    }

    topology
        .exchanges
        .iter()
        .for_each(|exchange| check_exchange(exchange, &mut out));
    topology
        .queues
        .iter()
        .for_each(|queue| check_queue(queue, &mut out));
    check_duplicates(topology, &mut out);

    let exchanges: BTreeMap<&str, ExchangeType> = topology
        .exchanges
        .iter()
        .map(|e| (e.name.as_str(), e.exchange_type))
        .collect();
    let queues: BTreeSet<&str> = topology.queues.iter().map(|q| q.name.as_str()).collect();

    topology
        .bindings
        .iter()
        .for_each(|binding| check_binding(binding, &exchanges, &queues, &mut out));

    check_orphans(topology, &mut out);

    out.finish()
}

fn check_name(kind: &str, name: &str, out: &mut Collector) -> bool {
    let name = name.trim();
    if name.is_empty() {
        out.error(format!("{kind} name is required"));
        return false;
    }
    if !rules::is_valid_name(name) {
        out.error(format!("{kind} name '{name}' contains invalid characters"));
        return false;
    }
    true
}

fn check_exchange(exchange: &Exchange, out: &mut Collector) {
    check_name("Exchange", &exchange.name, out);

    match exchange.exchange_type {
        ExchangeType::Headers if exchange.arguments.is_empty() => out.warning(format!(
            "Headers exchange '{}' has no header arguments defined",
            exchange.name
        )),
        ExchangeType::ConsistentHash if exchange.arguments.get_str(HASH_HEADER).is_none() => out
            .error(format!(
                "Consistent hash exchange '{}' requires a 'hash-header' argument",
                exchange.name
            )),
        _ => {}
    }
}

fn check_queue(queue: &Queue, out: &mut Collector) {
    check_name("Queue", &queue.name, out);

    if queue.max_length.is_some_and(|n| n <= 0) {
        out.error(format!(
            "Queue '{}' max length must be greater than 0",
            queue.name
        ));
    }
    if queue.message_ttl.is_some_and(|n| n <= 0) {
        out.error(format!(
            "Queue '{}' message TTL must be greater than 0",
            queue.name
        ));
    }
    if queue.effective_dead_letter_exchange().is_some()
        && queue.effective_dead_letter_routing_key().is_none()
    {
        out.warning(format!(
            "Queue '{}' has a dead letter exchange but no routing key specified",
            queue.name
        ));
    }
}

fn check_duplicates(topology: &Topology, out: &mut Collector) {
    let named = |name: &&str| !name.is_empty();
    for name in topology
        .exchanges
        .iter()
        .map(|e| e.name.as_str())
        .filter(named)
        .duplicates()
    {
        out.error(format!("Duplicate exchange name '{name}'"));
    }
    for name in topology
        .queues
        .iter()
        .map(|q| q.name.as_str())
        .filter(named)
        .duplicates()
    {
        out.error(format!("Duplicate queue name '{name}'"));
    }
}

fn check_binding(
    binding: &Binding,
    exchanges: &BTreeMap<&str, ExchangeType>,
    queues: &BTreeSet<&str>,
    out: &mut Collector,
) {
    let source = exchanges.get(binding.source_exchange.as_str()).copied();
    if source.is_none() {
        out.error(format!(
            "Binding references non-existent exchange '{}'",
            binding.source_exchange
        ));
    }

    match binding.destination_type {
        DestinationType::Queue if !queues.contains(binding.destination.as_str()) => {
            out.error(format!(
                "Binding references non-existent queue '{}'",
                binding.destination
            ));
        }
        DestinationType::Exchange if !exchanges.contains_key(binding.destination.as_str()) => {
            out.error(format!(
                "Binding references non-existent exchange '{}'",
                binding.destination
            ));
        }
        _ => {}
    }

    if binding.routing_key.len() > MAX_ROUTING_KEY_BYTES {
        out.error(format!(
            "Binding from '{}' has a routing key longer than {MAX_ROUTING_KEY_BYTES} bytes",
            binding.source_exchange
        ));
    }

    let Some(exchange_type) = source else {
        return;
    };
    let rule = rules::binding_rule(exchange_type);
    let has_key = !binding.routing_key.trim().is_empty();
    let name = &binding.source_exchange;

    match rule.routing_key {
        KeyRule::Required if !has_key => out.error(format!(
            "{} exchange binding '{name}' requires a routing key",
            type_label(exchange_type)
        )),
        KeyRule::Forbidden if has_key => out.error(format!(
            "{} exchange binding '{name}' should not have a routing key",
            type_label(exchange_type)
        )),
        _ => {}
    }

    if rule.arguments == ArgumentRule::Required && binding.arguments.is_empty() {
        out.error(format!(
            "{} exchange binding '{name}' requires header arguments",
            type_label(exchange_type)
        ));
    }
}

fn check_orphans(topology: &Topology, out: &mut Collector) {
    for exchange in &topology.exchanges {
        if exchange.exchange_type != ExchangeType::DeadLetter
            && topology.bindings_from(&exchange.name).next().is_none()
        {
            out.warning(format!("Exchange '{}' has no bindings", exchange.name));
        }
    }
    for queue in &topology.queues {
        if topology.bindings_to_queue(&queue.name).next().is_none() {
            out.warning(format!("Queue '{}' has no bindings", queue.name));
        }
    }
}

const fn type_label(exchange_type: ExchangeType) -> &'static str {
    match exchange_type {
        ExchangeType::Direct => "Direct",
        ExchangeType::Fanout => "Fanout",
        ExchangeType::Topic => "Topic",
        ExchangeType::Headers => "Headers",
        ExchangeType::ConsistentHash => "Consistent hash",
        ExchangeType::DeadLetter => "Dead letter",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::FieldTable;

    fn shop() -> Topology {
        Topology::new("shop")
            .with_exchange(Exchange::new("orders", ExchangeType::Direct))
            .with_queue(Queue::new("orders.created"))
            .with_binding(Binding::new("orders", "orders.created", "created"))
    }

    #[test]
    fn test_valid_topology_has_no_findings() {
        let report = validate(&shop());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_blank_topology_name() {
        let mut topology = shop();
        topology.name = "   ".into();
        let report = validate(&topology);
        assert!(!report.is_valid);
        assert!(report.errors.contains(&"Topology name is required".to_string()));
    }

    #[test]
    fn test_invalid_characters() {
        let topology = shop().with_exchange(Exchange::new("bad name!", ExchangeType::Fanout));
        let report = validate(&topology);
        assert!(report
            .errors
            .contains(&"Exchange name 'bad name!' contains invalid characters".to_string()));
    }

    /// GIVEN a consistent-hash exchange without `hash-header`
    /// WHEN validated
    /// THEN an error is reported, and adding the argument clears it
    #[test]
    fn test_consistent_hash_requires_hash_header() {
        let bare = Topology::new("t").with_exchange(Exchange::new(
            "shard",
            ExchangeType::ConsistentHash,
        ));
        let report = validate(&bare);
        assert!(report.errors.iter().any(|e| e.contains("'hash-header'")));

        let configured = Topology::new("t").with_exchange(
            Exchange::new("shard", ExchangeType::ConsistentHash)
                .with_argument(HASH_HEADER, "customer-id"),
        );
        assert!(validate(&configured).is_valid);
    }

    #[test]
    fn test_headers_exchange_without_arguments_warns() {
        let topology = Topology::new("t").with_exchange(Exchange::new("h", ExchangeType::Headers));
        let report = validate(&topology);
        assert!(report.is_valid);
        assert!(report
            .warnings
            .contains(&"Headers exchange 'h' has no header arguments defined".to_string()));
    }

    #[test]
    fn test_queue_limits_must_be_positive() {
        let topology = Topology::new("t").with_queue(
            Queue::new("q")
                .with_max_length(0)
                .with_message_ttl(-5),
        );
        let report = validate(&topology);
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    }

    #[test]
    fn test_dead_letter_without_routing_key_warns() {
        let topology =
            Topology::new("t").with_queue(Queue::new("q").with_dead_letter("q.dlx", None));
        let report = validate(&topology);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("no routing key")));
    }

    #[test]
    fn test_direct_binding_requires_routing_key() {
        let mut topology = shop();
        topology.bindings[0].routing_key = String::new();
        let report = validate(&topology);
        assert!(report
            .errors
            .contains(&"Direct exchange binding 'orders' requires a routing key".to_string()));
    }

    #[test]
    fn test_fanout_binding_with_key_is_error() {
        let topology = Topology::new("t")
            .with_exchange(Exchange::new("events", ExchangeType::Fanout))
            .with_queue(Queue::new("audit"))
            .with_binding(Binding::new("events", "audit", "ignored"));
        let report = validate(&topology);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("events")));
    }

    #[test]
    fn test_headers_binding_requires_arguments() {
        let exchange = Exchange::new("h", ExchangeType::Headers).with_argument("x-match", "all");
        let bare = Topology::new("t")
            .with_exchange(exchange.clone())
            .with_queue(Queue::new("q"))
            .with_binding(Binding::new("h", "q", ""));
        assert!(!validate(&bare).is_valid);

        let with_args = Topology::new("t")
            .with_exchange(exchange)
            .with_queue(Queue::new("q"))
            .with_binding(Binding::new("h", "q", "").with_argument("format", "pdf"));
        assert!(validate(&with_args).is_valid);
    }

    #[test]
    fn test_dangling_references() {
        let topology = shop()
            .with_binding(Binding::new("ghost", "orders.created", "k"))
            .with_binding(Binding::new("orders", "missing", "k"))
            .with_binding(Binding::to_exchange("orders", "nowhere", "k"));
        let report = validate(&topology);
        assert!(report
            .errors
            .contains(&"Binding references non-existent exchange 'ghost'".to_string()));
        assert!(report
            .errors
            .contains(&"Binding references non-existent queue 'missing'".to_string()));
        assert!(report
            .errors
            .contains(&"Binding references non-existent exchange 'nowhere'".to_string()));
    }

    #[test]
    fn test_routing_key_length_limit() {
        let mut topology = shop();
        topology.bindings[0].routing_key = "k".repeat(MAX_ROUTING_KEY_BYTES + 1);
        assert!(!validate(&topology).is_valid);
    }

    #[test]
    fn test_orphans_are_warnings() {
        let topology = shop()
            .with_exchange(Exchange::new("lonely", ExchangeType::Topic))
            .with_exchange(Exchange::new("graveyard", ExchangeType::DeadLetter))
            .with_queue(Queue::new("unbound"));
        let report = validate(&topology);
        assert!(report.is_valid);
        assert!(report
            .warnings
            .contains(&"Exchange 'lonely' has no bindings".to_string()));
        assert!(report
            .warnings
            .contains(&"Queue 'unbound' has no bindings".to_string()));
        assert!(!report.warnings.iter().any(|w| w.contains("graveyard")));
    }

    #[test]
    fn test_duplicate_names() {
        let topology = shop().with_queue(Queue::new("orders.created"));
        let report = validate(&topology);
        assert!(report
            .errors
            .contains(&"Duplicate queue name 'orders.created'".to_string()));
    }

    #[test]
    fn test_empty_argument_table_counts_as_absent() {
        let mut exchange = Exchange::new("h", ExchangeType::Headers);
        exchange.arguments = FieldTable::new();
        let report = validate(&Topology::new("t").with_exchange(exchange));
        assert_eq!(report.warnings.len(), 2);
    }
}
