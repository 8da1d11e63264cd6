//! Canonical form for topology names.

use chrono::Utc;

use crate::topology::{
    Binding, Exchange, FieldTable, FieldValue, Queue, Topology, ALTERNATE_EXCHANGE,
    DEAD_LETTER_EXCHANGE,
};

fn canonical(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Copy of `arguments` with the string value under `key` canonicalized.
fn canonical_argument(arguments: &FieldTable, key: &str) -> FieldTable {
    arguments
        .iter()
        .map(|(k, v)| match v {
            FieldValue::Str(name) if k == key => (k.clone(), FieldValue::Str(canonical(name))),
            _ => (k.clone(), v.clone()),
        })
        .collect()
}

/// Return a normalized copy of `topology`.
///
/// Names (topology, exchange, queue, binding endpoints, dead-letter exchange)
/// are trimmed and lower-cased, including exchange names carried in the
/// `x-dead-letter-exchange` and `alternate-exchange` arguments. Routing keys are trimmed only. The identifier,
/// `created_at` and metadata carry over; `updated_at` is set to now.
#[must_use]
pub fn normalize(topology: &Topology) -> Topology {
    let mut normalized = Topology::with_id(topology.id().clone(), canonical(&topology.name));
    normalized.description = topology.description.trim().to_string();
    normalized.exchanges = topology.exchanges.iter().map(normalize_exchange).collect();
    normalized.queues = topology.queues.iter().map(normalize_queue).collect();
    normalized.bindings = topology.bindings.iter().map(normalize_binding).collect();
    normalized.created_at = topology.created_at;
    normalized.updated_at = Utc::now();
    normalized.metadata.clone_from(&topology.metadata);
    normalized
}

fn normalize_exchange(exchange: &Exchange) -> Exchange {
    Exchange {
        name: canonical(&exchange.name),
        arguments: canonical_argument(&exchange.arguments, ALTERNATE_EXCHANGE),
        ..exchange.clone()
    }
}

fn normalize_queue(queue: &Queue) -> Queue {
    Queue {
        name: canonical(&queue.name),
        dead_letter_exchange: queue.dead_letter_exchange.as_deref().map(canonical),
        dead_letter_routing_key: queue
            .dead_letter_routing_key
            .as_deref()
            .map(|key| key.trim().to_string()),
        arguments: canonical_argument(&queue.arguments, DEAD_LETTER_EXCHANGE),
        ..queue.clone()
    }
}

fn normalize_binding(binding: &Binding) -> Binding {
    Binding {
        source_exchange: canonical(&binding.source_exchange),
        destination: canonical(&binding.destination),
        routing_key: binding.routing_key.trim().to_string(),
        ..binding.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analyzer::{analyze, FindingKind},
        topology::ExchangeType,
    };

    fn messy() -> Topology {
        let mut topology = Topology::new("  Shop  ")
            .with_exchange(Exchange::new(" Orders ", ExchangeType::Topic))
            .with_queue(Queue::new("Orders.Created ").with_dead_letter(" Orders.DLX", Some(" Dead ")))
            .with_binding(Binding::new("Orders ", " ORDERS.CREATED", "  Orders.*.Created "));
        topology.description = "  the shop  ".into();
        topology.metadata = Some(FieldTable::new().with("owner", "team-a"));
        topology
    }

    #[test]
    fn test_names_are_trimmed_and_lowercased() {
        let normalized = normalize(&messy());
        assert_eq!(normalized.name, "shop");
        assert_eq!(normalized.description, "the shop");
        assert_eq!(normalized.exchanges[0].name, "orders");
        assert_eq!(normalized.queues[0].name, "orders.created");
        assert_eq!(
            normalized.queues[0].dead_letter_exchange.as_deref(),
            Some("orders.dlx")
        );
        assert_eq!(
            normalized.queues[0].dead_letter_routing_key.as_deref(),
            Some("Dead")
        );
        assert_eq!(normalized.bindings[0].source_exchange, "orders");
        assert_eq!(normalized.bindings[0].destination, "orders.created");
    }

    #[test]
    fn test_exchange_names_in_arguments_are_lowercased() {
        let topology = Topology::new("shop")
            .with_exchange(
                Exchange::new("Orders", ExchangeType::Topic)
                    .with_argument(ALTERNATE_EXCHANGE, " Orders.Unrouted "),
            )
            .with_exchange(Exchange::new("Orders.Unrouted", ExchangeType::Fanout))
            .with_exchange(Exchange::new("Orders.DLX", ExchangeType::Fanout))
            .with_queue(
                Queue::new("orders.created")
                    .with_argument(DEAD_LETTER_EXCHANGE, "Orders.DLX")
                    .with_argument("x-queue-mode", "Lazy"),
            );

        let normalized = normalize(&topology);
        assert_eq!(
            normalized.exchanges[0].arguments.get_str(ALTERNATE_EXCHANGE),
            Some("orders.unrouted")
        );
        assert_eq!(
            normalized.queues[0].effective_dead_letter_exchange(),
            Some("orders.dlx")
        );
        assert_eq!(normalized.queues[0].arguments.get_str("x-queue-mode"), Some("Lazy"));
        assert!(!analyze(&normalized).iter().any(|f| f.kind == FindingKind::Error));
        assert_eq!(normalize(&normalized).queues, normalized.queues);
        assert_eq!(normalize(&normalized).exchanges, normalized.exchanges);
    }

    #[test]
    fn test_routing_key_keeps_case() {
        let normalized = normalize(&messy());
        assert_eq!(normalized.bindings[0].routing_key, "Orders.*.Created");
    }

    #[test]
    fn test_identity_and_metadata_preserved() {
        let original = messy();
        let normalized = normalize(&original);
        assert_eq!(normalized.id(), original.id());
        assert_eq!(normalized.created_at, original.created_at);
        assert_eq!(normalized.metadata, original.metadata);
        assert!(normalized.updated_at >= original.updated_at);
    }

    #[test]
    fn test_input_untouched() {
        let original = messy();
        let snapshot = original.clone();
        let _ = normalize(&original);
        assert_eq!(original, snapshot);
    }
}
