//! Heuristic anti-pattern detection.
//!
//! Every check runs over the whole topology and contributes zero or more
//! [`Finding`]s. Findings are advisory; nothing here blocks an operation.
//!
//! Checks:
//! - unbound exchanges and queues
//! - queues without a length limit or dead-letter exchange
//! - dead-letter exchanges that do not exist
//! - queue naming convention
//! - topic exchanges without wildcards, malformed topic patterns
//! - wildcards on direct bindings
//! - fan-in from several exchanges into one queue
//! - exchange-to-exchange routing cycles

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    rules::{self, KeyRule},
    topology::{Binding, ExchangeType, Topology},
};

/// Finding category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum FindingKind {
    Info,
    Warning,
    Error,
}

impl FindingKind {
    /// Severity on the 1-3 scale.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
        }
    }
}

/// One advisory result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
    pub severity: u8,
    pub recommendations: Vec<String>,
}

impl Finding {
    fn new(kind: FindingKind, message: String, recommendations: &[String]) -> Self {
        Self {
            kind,
            message,
            severity: kind.severity(),
            recommendations: recommendations.to_vec(),
        }
    }
}

/// Run every check over `topology`.
#[must_use]
pub fn analyze(topology: &Topology) -> Vec<Finding> {
    let checks: [fn(&Topology) -> Vec<Finding>; 9] = [
        unbound_exchanges,
        unbound_queues,
        unbounded_queues,
        dead_letter_configuration,
        queue_naming,
        topic_without_wildcards,
        routing_key_patterns,
        fan_in,
        exchange_cycles,
    ];
    checks.iter().flat_map(|check| check(topology)).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// CHECKS
// ═══════════════════════════════════════════════════════════════════════════

fn unbound_exchanges(topology: &Topology) -> Vec<Finding> {
    let bound: BTreeSet<&str> = topology
        .bindings
        .iter()
        .map(|b| b.source_exchange.as_str())
        .collect();

    topology
        .exchanges
        .iter()
        .filter(|e| !e.name.is_empty() && e.exchange_type != ExchangeType::DeadLetter)
        .filter(|e| !bound.contains(e.name.as_str()))
        .map(|e| {
            Finding::new(
                FindingKind::Warning,
                format!("Exchange '{}' has no bindings", e.name),
                &[
                    format!(
                        "Consider adding bindings to exchange '{}' or remove it if unused",
                        e.name
                    ),
                    "Unbound exchanges can lead to message loss if publishers are using them"
                        .to_string(),
                ],
            )
        })
        .collect()
}

fn unbound_queues(topology: &Topology) -> Vec<Finding> {
    topology
        .queues
        .iter()
        .filter(|q| topology.bindings_to_queue(&q.name).next().is_none())
        .map(|q| {
            Finding::new(
                FindingKind::Warning,
                format!("Queue '{}' is not bound to any exchange", q.name),
                &[
                    format!("Bind queue '{}' to an appropriate exchange", q.name),
                    "Unbound queues will not receive any messages".to_string(),
                ],
            )
        })
        .collect()
}

fn unbounded_queues(topology: &Topology) -> Vec<Finding> {
    topology
        .queues
        .iter()
        .filter(|q| q.effective_max_length().is_none())
        .map(|q| {
            Finding::new(
                FindingKind::Info,
                format!("Queue '{}' has no message limit (x-max-length)", q.name),
                &[
                    format!("Consider setting a maximum length for queue '{}'", q.name),
                    "Unbounded queues can consume unlimited memory if producers outpace consumers"
                        .to_string(),
                    "Use x-max-length argument to set a safe upper bound".to_string(),
                ],
            )
        })
        .collect()
}

fn dead_letter_configuration(topology: &Topology) -> Vec<Finding> {
    topology
        .queues
        .iter()
        .filter_map(|q| match q.effective_dead_letter_exchange() {
            Some(dlx) if topology.exchange(dlx).is_none() => Some(Finding::new(
                FindingKind::Error,
                format!(
                    "Dead letter exchange '{dlx}' for queue '{}' does not exist",
                    q.name
                ),
                &[
                    format!("Create the dead letter exchange '{dlx}'"),
                    "Ensure the DLX has appropriate bindings to handle dead-lettered messages"
                        .to_string(),
                ],
            )),
            Some(_) => None,
            None => Some(Finding::new(
                FindingKind::Info,
                format!("Queue '{}' has no dead letter exchange configured", q.name),
                &[
                    "Consider configuring a dead letter exchange for handling failed messages"
                        .to_string(),
                    "Dead letter exchanges help prevent message loss and aid in debugging"
                        .to_string(),
                ],
            )),
        })
        .collect()
}

fn queue_naming(topology: &Topology) -> Vec<Finding> {
    topology
        .queues
        .iter()
        .filter(|q| !q.name.contains('.'))
        .map(|q| {
            Finding::new(
                FindingKind::Info,
                format!(
                    "Queue '{}' does not follow dot-separated naming convention",
                    q.name
                ),
                &[
                    "Consider using dot-separated names (e.g., 'service.entity.action')"
                        .to_string(),
                    "Consistent naming helps with organization and topic-based routing"
                        .to_string(),
                ],
            )
        })
        .collect()
}

fn topic_without_wildcards(topology: &Topology) -> Vec<Finding> {
    topology
        .exchanges
        .iter()
        .filter(|e| rules::binding_rule(e.exchange_type).wildcards)
        .filter(|e| {
            !topology
                .bindings_from(&e.name)
                .any(|b| rules::has_wildcard(&b.routing_key))
        })
        .map(|e| {
            Finding::new(
                FindingKind::Info,
                format!("Topic exchange '{}' has no wildcard bindings", e.name),
                &[
                    "Consider using direct exchange if wildcards are not needed".to_string(),
                    "Topic exchanges are most useful with wildcard routing patterns".to_string(),
                ],
            )
        })
        .collect()
}

fn routing_key_patterns(topology: &Topology) -> Vec<Finding> {
    let mut findings = Vec::new();
    for binding in &topology.bindings {
        let Some(exchange) = topology.exchange(&binding.source_exchange) else {
            continue;
        };
        let key = binding.routing_key.trim();
        let rule = rules::binding_rule(exchange.exchange_type);
        let wildcards = rule.wildcards;

        if !wildcards && rule.routing_key == KeyRule::Required && rules::has_wildcard(key) {
            findings.push(Finding::new(
                FindingKind::Warning,
                format!(
                    "Direct exchange binding '{}' uses wildcard characters in routing key '{key}'",
                    binding.source_exchange
                ),
                &[
                    "Direct exchanges match routing keys literally; '*' and '#' are not wildcards"
                        .to_string(),
                    "Use a topic exchange if pattern matching is intended".to_string(),
                ],
            ));
        }

        if wildcards && !key.is_empty() {
            if !rules::is_valid_topic_pattern(key) {
                findings.push(Finding::new(
                    FindingKind::Warning,
                    format!(
                        "Topic exchange binding '{}' has an invalid pattern '{key}'",
                        binding.source_exchange
                    ),
                    &[
                        "Use dot-separated words with '*' or '#' as whole segments".to_string(),
                        "Empty segments and '##' never match as intended".to_string(),
                    ],
                ));
            } else if key.starts_with('#') {
                findings.push(Finding::new(
                    FindingKind::Info,
                    format!(
                        "Topic exchange binding '{}' pattern '{key}' starts with '#' and matches all messages",
                        binding.source_exchange
                    ),
                    &[
                        "Consider a more specific pattern".to_string(),
                        "Use a fanout exchange if every message should be delivered".to_string(),
                    ],
                ));
            }
        }
    }
    findings
}

fn fan_in(topology: &Topology) -> Vec<Finding> {
    let mut sources: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for binding in topology.bindings.iter().filter(|b| b.targets_queue()) {
        sources
            .entry(binding.destination.as_str())
            .or_default()
            .insert(binding.source_exchange.as_str());
    }

    sources
        .into_iter()
        .filter(|(_, exchanges)| exchanges.len() > 1)
        .map(|(queue, exchanges)| {
            Finding::new(
                FindingKind::Info,
                format!(
                    "Queue '{queue}' is bound to multiple exchanges ({})",
                    exchanges.len()
                ),
                &[
                    "Multiple bindings can make message flow harder to track".to_string(),
                    "Consider if this is intentional or if the routing could be simplified"
                        .to_string(),
                ],
            )
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// CYCLE DETECTION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

struct CycleSearch<'a> {
    edges: BTreeMap<&'a str, BTreeSet<&'a str>>,
    marks: BTreeMap<&'a str, Mark>,
    path: Vec<&'a str>,
    cycles: Vec<Vec<&'a str>>,
}

impl<'a> CycleSearch<'a> {
    fn new(bindings: &'a [Binding]) -> Self {
        let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for binding in bindings.iter().filter(|b| !b.targets_queue()) {
            edges
                .entry(binding.source_exchange.as_str())
                .or_default()
                .insert(binding.destination.as_str());
        }
        Self {
            edges,
            marks: BTreeMap::new(),
            path: Vec::new(),
            cycles: Vec::new(),
        }
    }

    fn mark(&self, node: &str) -> Mark {
        self.marks.get(node).copied().unwrap_or(Mark::White)
    }

    fn run(mut self) -> Vec<Vec<&'a str>> {
        let roots: Vec<&str> = self.edges.keys().copied().collect();
        for root in roots {
            if self.mark(root) == Mark::White {
                self.visit(root);
            }
        }
        self.cycles
    }

    fn visit(&mut self, node: &'a str) {
        self.marks.insert(node, Mark::Grey);
        self.path.push(node);

        let next: Vec<&str> = self
            .edges
            .get(node)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default();
        for target in next {
            match self.mark(target) {
                Mark::White => self.visit(target),
                Mark::Grey => {
                    if let Some(start) = self.path.iter().position(|n| *n == target) {
                        let mut cycle: Vec<&str> = self.path.iter().skip(start).copied().collect();
                        cycle.push(target);
                        self.cycles.push(cycle);
                    }
                }
                Mark::Black => {}
            }
        }

        self.path.pop();
        self.marks.insert(node, Mark::Black);
    }
}

fn exchange_cycles(topology: &Topology) -> Vec<Finding> {
    CycleSearch::new(&topology.bindings)
        .run()
        .into_iter()
        .map(|cycle| {
            Finding::new(
                FindingKind::Error,
                format!("Exchange routing cycle detected: {}", cycle.join(" -> ")),
                &[
                    "Remove one of the exchange-to-exchange bindings on the cycle".to_string(),
                    "Cyclic routing can duplicate or loop messages indefinitely".to_string(),
                ],
            )
        })
        .collect()
}
