//! Notification sinks for simulation status pushes.
//!
//! Pushes are fire-and-forget: a sink must return promptly and must not
//! report delivery failures back to the simulator.

use tokio::sync::broadcast;

use crate::simulator::SimulationStatus;

/// Receiver of live simulation updates.
pub trait NotificationSink: Send + Sync {
    fn push_simulation_update(&self, status: &SimulationStatus);
}

/// Logs every update through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn push_simulation_update(&self, status: &SimulationStatus) {
        tracing::info!(
            simulation_id = %status.id,
            state = %status.state,
            published = status.messages_published,
            consumed = status.messages_consumed,
            failed = status.failed_messages,
            publish_rate = status.publish_rate,
            error = status.error.as_deref().unwrap_or(""),
            "Simulation update"
        );
    }
}

/// Fans updates out over a tokio broadcast channel.
///
/// Updates sent with no subscribers, or that a lagging subscriber misses,
/// are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SimulationStatus>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationStatus> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn push_simulation_update(&self, status: &SimulationStatus) {
        let _ = self.tx.send(status.clone());
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn push_simulation_update(&self, _status: &SimulationStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulationId, SimulationState};

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let status = SimulationStatus::new(SimulationId::new("s"));

        sink.push_simulation_update(&status);
        let received = rx.recv().await;
        assert!(matches!(received, Ok(s) if s.state == SimulationState::Initializing));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(1);
        sink.push_simulation_update(&SimulationStatus::new(SimulationId::new("s")));
        NullSink.push_simulation_update(&SimulationStatus::new(SimulationId::new("s")));
        TracingSink.push_simulation_update(&SimulationStatus::new(SimulationId::new("s")));
    }
}
