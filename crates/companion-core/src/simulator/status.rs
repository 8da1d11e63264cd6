//! Simulation identity, lifecycle state and live counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique simulation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(String);

impl SimulationId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one run.
///
/// `Initializing -> Running -> {Completed | Stopped | Failed}`. Terminal
/// states are absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SimulationState {
    Initializing,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SimulationState {
    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Live status record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub id: SimulationId,
    pub state: SimulationState,
    pub messages_published: u64,
    pub messages_consumed: u64,
    pub failed_messages: u64,
    /// Messages published per second since the run started
    pub publish_rate: f64,
    pub consume_rate: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SimulationStatus {
    #[must_use]
    pub const fn new(id: SimulationId) -> Self {
        Self {
            id,
            state: SimulationState::Initializing,
            messages_published: 0,
            messages_consumed: 0,
            failed_messages: 0,
            publish_rate: 0.0,
            consume_rate: 0.0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Move to `next`. Returns false, leaving the record untouched, when the
    /// current state is terminal or the move goes backwards.
    pub fn transition(&mut self, next: SimulationState) -> bool {
        let allowed = match (self.state, next) {
            (current, _) if current.is_terminal() => false,
            (SimulationState::Initializing, SimulationState::Running) => true,
            (_, target) => target.is_terminal(),
        };
        if !allowed {
            return false;
        }
        let now = Utc::now();
        self.state = next;
        if next == SimulationState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Terminal transition carrying an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let changed = self.transition(SimulationState::Failed);
        if changed {
            self.error = Some(error.into());
        }
        changed
    }

    fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        self.started_at
            .map_or(0.0, |start| (now - start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6)
    }

    /// Count one publish and recompute the publish rate.
    pub fn record_publish(&mut self) {
        self.messages_published += 1;
        let elapsed = self.elapsed_secs(Utc::now());
        if elapsed > 0.0 {
            self.publish_rate = self.messages_published as f64 / elapsed;
        }
    }

    /// Count one consume and recompute the consume rate.
    pub fn record_consume(&mut self) {
        self.messages_consumed += 1;
        let elapsed = self.elapsed_secs(Utc::now());
        if elapsed > 0.0 {
            self.consume_rate = self.messages_consumed as f64 / elapsed;
        }
    }

    pub fn record_failure(&mut self) {
        self.failed_messages += 1;
    }
}
