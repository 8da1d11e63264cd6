//! # Companion Core
//!
//! Topology graph engine for message-broker tooling.
//!
//! This crate provides:
//! - The topology model (exchanges, queues, bindings, typed argument tables)
//! - Validation, normalization and anti-pattern analysis (pure, synchronous)
//! - A concurrent flow simulator that publishes synthetic traffic against a broker
//! - A dead-letter tracer that reconstructs routing history from death metadata
//! - Broker collaborators (in-memory and management HTTP) and notification sinks
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod analyzer;
pub mod broker;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod notify;
pub mod rules;
pub mod simulator;
pub mod topology;
pub mod tracer;
pub mod validator;

pub use analyzer::{analyze, Finding, FindingKind};
pub use broker::{
    Broker, BrokerMessage, Channel, InMemoryBroker, ManagementBroker, OutboundMessage,
};
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use normalizer::normalize;
pub use notify::{BroadcastSink, NotificationSink, NullSink, TracingSink};
pub use simulator::{
    FlowSimulator, SimulationConfig, SimulationId, SimulationState, SimulationStatus,
    SimulationStore,
};
pub use topology::{
    Binding, DestinationType, Exchange, ExchangeType, FieldTable, FieldValue, KnownArgument,
    Queue, Topology, TopologyId,
};
pub use tracer::{DeadLetterDetails, DeadLetterTracer, DeadLetteredMessage, MessageTrace};
pub use validator::{validate, ValidationReport};
