//! Flow simulator
//!
//! Drives synthetic publishing against a broker:
//!
//! - [`FlowSimulator::start`] validates the config against the live topology,
//!   registers an `Initializing` record and spawns the run. It returns as soon
//!   as the run is launched.
//! - The run splits `message_count` across `concurrent_publishers` loops that
//!   share one channel and one status record.
//! - [`FlowSimulator::stop`] cancels the run and marks it `Stopped` at once.
//!
//! Worker loops check cancellation once per iteration. A publish already in
//! flight is allowed to finish.

mod config;
mod status;
mod store;

pub use config::SimulationConfig;
pub use status::{SimulationId, SimulationState, SimulationStatus};
pub use store::SimulationStore;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinSet,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{Broker, BrokerMessage, Channel, OutboundMessage},
    config::SimulatorConfig,
    notify::NotificationSink,
    Error, Result,
};

/// Header stamped on every synthetic message.
pub const SIMULATION_ID_HEADER: &str = "x-simulation-id";

const CONSUMER_IDLE: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════════════════════════════════════
// SHARED CHANNEL
// ═══════════════════════════════════════════════════════════════════════════

/// One channel shared by every worker of a run, locked only when the
/// transport cannot take concurrent callers.
#[derive(Clone)]
enum SharedChannel {
    Concurrent(Arc<dyn Channel>),
    Serialized(Arc<Mutex<Box<dyn Channel>>>),
}

impl SharedChannel {
    fn new(channel: Box<dyn Channel>) -> Self {
        if channel.supports_concurrent_use() {
            Self::Concurrent(Arc::from(channel))
        } else {
            Self::Serialized(Arc::new(Mutex::new(channel)))
        }
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage) -> Result<()> {
        match self {
            Self::Concurrent(channel) => channel.publish(exchange, routing_key, message).await,
            Self::Serialized(channel) => {
                channel
                    .lock()
                    .await
                    .publish(exchange, routing_key, message)
                    .await
            }
        }
    }

    async fn consume(&self, queue: &str) -> Result<Option<BrokerMessage>> {
        match self {
            Self::Concurrent(channel) => channel.peek_or_consume(queue, true).await,
            Self::Serialized(channel) => channel.lock().await.peek_or_consume(queue, true).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::Concurrent(channel) => channel.close().await,
            Self::Serialized(channel) => channel.lock().await.close().await,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RUN CONTEXT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Finished,
    Cancelled,
}

/// Everything one run's tasks share.
struct Run {
    id: SimulationId,
    config: SimulationConfig,
    status: Arc<RwLock<SimulationStatus>>,
    sink: Arc<dyn NotificationSink>,
    status_interval: usize,
    payload: Vec<u8>,
    sequence: AtomicU64,
}

impl Run {
    async fn push_status(&self) {
        let snapshot = self.status.read().await.clone();
        self.sink.push_simulation_update(&snapshot);
    }

    fn next_message(&self) -> OutboundMessage {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let headers = self
            .config
            .headers
            .clone()
            .with(SIMULATION_ID_HEADER, self.id.as_str());
        OutboundMessage::new(self.payload.clone())
            .with_message_id(format!("{}-{seq}", self.id))
            .with_headers(headers)
    }

    /// One publisher loop.
    async fn publish_loop(
        self: Arc<Self>,
        index: usize,
        channel: SharedChannel,
        cancel: CancellationToken,
    ) -> Result<LoopExit> {
        let share = self.config.share_for(index);
        let exchange = self.config.target_exchange().to_string();
        let routing_key = self.config.routing_key_pattern.clone();
        let delay = self.config.publish_delay();
        let mut rng = StdRng::from_entropy();

        debug!(simulation_id = %self.id, publisher = index, share, "Publisher started");

        for j in 0..share {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            if self.config.failure_rate > 0.0 && rng.gen::<f64>() < self.config.failure_rate {
                self.status.write().await.record_failure();
            } else {
                channel
                    .publish(&exchange, &routing_key, self.next_message())
                    .await?;
                self.status.write().await.record_publish();
            }

            if j % self.status_interval == 0 {
                self.push_status().await;
            }

            if let Some(delay) = delay {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(LoopExit::Cancelled),
                    () = sleep(delay) => {}
                }
            }
        }
        Ok(LoopExit::Finished)
    }

    /// Drains `queue` until publishers are done and the queue is empty.
    async fn consume_loop(
        self: Arc<Self>,
        queue: String,
        channel: SharedChannel,
        cancel: CancellationToken,
        publishers_done: CancellationToken,
    ) -> Result<LoopExit> {
        loop {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }
            if channel.consume(&queue).await?.is_some() {
                self.status.write().await.record_consume();
                continue;
            }
            if publishers_done.is_cancelled() {
                return Ok(LoopExit::Finished);
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(LoopExit::Cancelled),
                () = sleep(CONSUMER_IDLE) => {}
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SIMULATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Launches and controls simulation runs.
pub struct FlowSimulator {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn NotificationSink>,
    store: SimulationStore,
    limits: SimulatorConfig,
}

impl FlowSimulator {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        sink: Arc<dyn NotificationSink>,
        store: SimulationStore,
    ) -> Self {
        Self {
            broker,
            sink,
            store,
            limits: SimulatorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: SimulatorConfig) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &SimulationStore {
        &self.store
    }

    /// Validate `config` and launch a run.
    ///
    /// # Errors
    ///
    /// - `InvalidSimulation` if the config is out of bounds, or the target
    ///   exchange (or consume queue) is missing from the broker topology
    /// - `Broker` if the topology cannot be fetched
    ///
    /// No status record exists when this fails.
    pub async fn start(&self, config: SimulationConfig) -> Result<SimulationId> {
        config.validate(&self.limits)?;

        let topology = self.broker.current_topology().await?;
        let exchange = config.target_exchange();
        if topology.exchange(exchange).is_none() {
            return Err(Error::InvalidSimulation(format!(
                "Exchange '{exchange}' from routing key pattern '{}' does not exist",
                config.routing_key_pattern
            )));
        }
        if let Some(queue) = &config.consume_queue {
            if topology.queue(queue).is_none() {
                return Err(Error::InvalidSimulation(format!(
                    "Consume queue '{queue}' does not exist"
                )));
            }
        }

        let id = SimulationId::generate();
        let entry = self.store.insert(SimulationStatus::new(id.clone())).await;

        let mut payload = vec![0_u8; config.message_size];
        StdRng::from_entropy().fill_bytes(&mut payload);

        let run = Arc::new(Run {
            id: id.clone(),
            config,
            status: entry.status,
            sink: Arc::clone(&self.sink),
            status_interval: self.limits.status_interval.max(1),
            payload,
            sequence: AtomicU64::new(0),
        });

        info!(
            simulation_id = %id,
            exchange = run.config.target_exchange(),
            messages = run.config.message_count,
            publishers = run.config.concurrent_publishers,
            "Simulation starting"
        );
        tokio::spawn(execute(Arc::clone(&self.broker), run, entry.cancel));
        Ok(id)
    }

    /// Cancel a run and mark it `Stopped`. Stopping a finished run is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn stop(&self, id: &SimulationId) -> Result<()> {
        let entry = self.store.entry(id).await?;
        entry.cancel.cancel();

        let snapshot = {
            let mut status = entry.status.write().await;
            status
                .transition(SimulationState::Stopped)
                .then(|| status.clone())
        };
        if let Some(snapshot) = snapshot {
            info!(simulation_id = %id, "Simulation stopped");
            self.sink.push_simulation_update(&snapshot);
        }
        Ok(())
    }

    /// Live status of a run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn status(&self, id: &SimulationId) -> Result<SimulationStatus> {
        self.store.status(id).await
    }

    pub async fn list(&self) -> Vec<SimulationStatus> {
        self.store.list().await
    }

    /// Forget a finished run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, `InvalidSimulation` for a run
    /// that has not finished
    pub async fn remove(&self, id: &SimulationId) -> Result<SimulationStatus> {
        let removed = self.store.remove(id).await?;
        debug!(simulation_id = %id, state = %removed.state, "Simulation removed");
        Ok(removed)
    }
}

/// Body of a spawned run; every outcome lands in the status record.
async fn execute(broker: Arc<dyn Broker>, run: Arc<Run>, cancel: CancellationToken) {
    let channel = match broker.open_channel().await {
        Ok(channel) => SharedChannel::new(channel),
        Err(e) => {
            error!(simulation_id = %run.id, error = %e, "Failed to open channel");
            finish(&run, Some(e.to_string()), false).await;
            return;
        }
    };

    let started = run.status.write().await.transition(SimulationState::Running);
    if !started {
        // Stopped while the channel was opening.
        if let Err(e) = channel.close().await {
            warn!(simulation_id = %run.id, error = %e, "Failed to close channel");
        }
        return;
    }
    info!(simulation_id = %run.id, "Simulation running");
    run.push_status().await;

    // Faults cancel siblings without looking like an external stop.
    let workers = cancel.child_token();
    let publishers_done = CancellationToken::new();

    let consumer = run.config.consume_queue.clone().map(|queue| {
        let drain = Arc::clone(&run).consume_loop(
            queue,
            channel.clone(),
            workers.clone(),
            publishers_done.clone(),
        );
        let workers = workers.clone();
        tokio::spawn(async move {
            let result = drain.await;
            if result.is_err() {
                workers.cancel();
            }
            result
        })
    });

    let mut publishers = JoinSet::new();
    for index in 0..run.config.concurrent_publishers {
        publishers.spawn(Arc::clone(&run).publish_loop(index, channel.clone(), workers.clone()));
    }

    let mut fault: Option<String> = None;
    while let Some(joined) = publishers.join_next().await {
        let outcome = joined.map_err(|e| Error::broker(format!("publisher task failed: {e}")));
        match outcome.and_then(|result| result) {
            Ok(LoopExit::Finished) => {}
            Ok(LoopExit::Cancelled) => {
                debug!(simulation_id = %run.id, "Publisher observed cancellation");
            }
            Err(e) => {
                error!(simulation_id = %run.id, error = %e, "Publisher failed");
                fault.get_or_insert_with(|| e.to_string());
                workers.cancel();
            }
        }
    }
    publishers_done.cancel();

    if let Some(consumer) = consumer {
        let outcome = consumer
            .await
            .map_err(|e| Error::broker(format!("consumer task failed: {e}")));
        if let Err(e) = outcome.and_then(|result| result) {
            error!(simulation_id = %run.id, error = %e, "Consumer failed");
            fault.get_or_insert_with(|| e.to_string());
        }
    }

    if let Err(e) = channel.close().await {
        warn!(simulation_id = %run.id, error = %e, "Failed to close channel");
    }

    finish(&run, fault, cancel.is_cancelled()).await;
}

async fn finish(run: &Run, fault: Option<String>, stopped: bool) {
    let snapshot = {
        let mut status = run.status.write().await;
        let changed = match fault {
            Some(message) => status.fail(message),
            None if stopped => status.transition(SimulationState::Stopped),
            None => status.transition(SimulationState::Completed),
        };
        changed.then(|| status.clone())
    };

    if let Some(snapshot) = snapshot {
        info!(
            simulation_id = %run.id,
            state = %snapshot.state,
            published = snapshot.messages_published,
            failed = snapshot.failed_messages,
            "Simulation finished"
        );
        run.sink.push_simulation_update(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::InMemoryBroker,
        notify::NullSink,
        topology::{Binding, Exchange, ExchangeType, Queue, Topology},
    };

    fn simulator() -> (FlowSimulator, InMemoryBroker) {
        let broker = InMemoryBroker::new(
            Topology::new("t")
                .with_exchange(Exchange::new("orders", ExchangeType::Topic))
                .with_queue(Queue::new("orders.all"))
                .with_binding(Binding::new("orders", "orders.all", "orders.#")),
        );
        let simulator = FlowSimulator::new(
            Arc::new(broker.clone()),
            Arc::new(NullSink),
            SimulationStore::new(),
        );
        (simulator, broker)
    }

    #[tokio::test]
    async fn test_missing_exchange_fails_before_record() {
        let (simulator, _) = simulator();
        let result = simulator
            .start(SimulationConfig::new("payments.created", 10))
            .await;
        assert!(matches!(result, Err(Error::InvalidSimulation(_))));
        assert!(simulator.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_is_not_found() {
        let (simulator, _) = simulator();
        let result = simulator.stop(&SimulationId::new("nope")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_message_ids_and_headers() -> Result<()> {
        let (simulator, broker) = simulator();
        let id = simulator
            .start(SimulationConfig::new("orders.created", 3))
            .await?;

        for _ in 0..200 {
            if simulator.status(&id).await?.state.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        let messages = broker.messages("orders.all").await;
        assert_eq!(messages.len(), 3);
        let prefix = format!("{id}-");
        assert!(messages
            .iter()
            .all(|m| m.message_id.as_deref().is_some_and(|mid| mid.starts_with(&prefix))));
        assert!(messages
            .iter()
            .all(|m| m.headers.get_str(SIMULATION_ID_HEADER) == Some(id.as_str())));
        Ok(())
    }
}
