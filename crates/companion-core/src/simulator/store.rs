//! Registry of simulation runs, owned by whoever owns the simulator.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::status::{SimulationId, SimulationStatus};
use crate::{Error, Result};

/// Shared handles for one run.
#[derive(Debug, Clone)]
pub(crate) struct RunEntry {
    pub(crate) status: Arc<RwLock<SimulationStatus>>,
    pub(crate) cancel: CancellationToken,
}

/// In-memory store of simulation runs.
///
/// Cloning shares the underlying map. Two stores created separately never
/// see each other's runs. Nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct SimulationStore {
    runs: Arc<RwLock<HashMap<SimulationId, RunEntry>>>,
}

impl SimulationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, status: SimulationStatus) -> RunEntry {
        let entry = RunEntry {
            status: Arc::new(RwLock::new(status.clone())),
            cancel: CancellationToken::new(),
        };
        self.runs.write().await.insert(status.id, entry.clone());
        entry
    }

    pub(crate) async fn entry(&self, id: &SimulationId) -> Result<RunEntry> {
        self.runs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("simulation", id))
    }

    /// Snapshot of one run's status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn status(&self, id: &SimulationId) -> Result<SimulationStatus> {
        let entry = self.entry(id).await?;
        let snapshot = entry.status.read().await.clone();
        Ok(snapshot)
    }

    /// Snapshots of every run, oldest start first.
    pub async fn list(&self) -> Vec<SimulationStatus> {
        let entries: Vec<RunEntry> = self.runs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.status.read().await.clone());
        }
        snapshots.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        snapshots
    }

    /// Drop a finished run and return its final status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, `InvalidSimulation` while the run
    /// is still initializing or running
    pub async fn remove(&self, id: &SimulationId) -> Result<SimulationStatus> {
        let mut runs = self.runs.write().await;
        let entry = runs.get(id).ok_or_else(|| Error::not_found("simulation", id))?;
        let snapshot = entry.status.read().await.clone();
        if !snapshot.state.is_terminal() {
            return Err(Error::InvalidSimulation(format!(
                "simulation '{id}' is still {}",
                snapshot.state
            )));
        }
        runs.remove(id);
        Ok(snapshot)
    }

    /// Drop every finished run, returning how many went.
    pub async fn prune_finished(&self) -> usize {
        let mut runs = self.runs.write().await;
        let mut finished = Vec::new();
        for (id, entry) in runs.iter() {
            if entry.status.read().await.state.is_terminal() {
                finished.push(id.clone());
            }
        }
        for id in &finished {
            runs.remove(id);
        }
        finished.len()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::status::SimulationState;

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = SimulationStore::new();
        let result = store.status(&SimulationId::new("missing")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_only_takes_finished_runs() -> Result<()> {
        let store = SimulationStore::new();
        let running = SimulationId::generate();
        let done = SimulationId::generate();
        store.insert(SimulationStatus::new(running.clone())).await;
        let entry = store.insert(SimulationStatus::new(done.clone())).await;
        assert!(entry.status.write().await.transition(SimulationState::Stopped));

        assert!(matches!(
            store.remove(&running).await,
            Err(Error::InvalidSimulation(_))
        ));
        assert_eq!(store.remove(&done).await?.state, SimulationState::Stopped);
        assert!(matches!(store.remove(&done).await, Err(Error::NotFound(_))));
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_keeps_live_runs() -> Result<()> {
        let store = SimulationStore::new();
        let live = SimulationId::generate();
        store.insert(SimulationStatus::new(live.clone())).await;
        for _ in 0..3 {
            let entry = store.insert(SimulationStatus::new(SimulationId::generate())).await;
            assert!(entry.status.write().await.fail("boom"));
        }

        assert_eq!(store.prune_finished().await, 3);
        assert_eq!(store.len().await, 1);
        assert!(store.status(&live).await.is_ok());
        assert_eq!(store.prune_finished().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_separate_stores_are_isolated() -> Result<()> {
        let first = SimulationStore::new();
        let second = SimulationStore::new();
        let id = SimulationId::generate();
        first.insert(SimulationStatus::new(id.clone())).await;

        assert!(first.status(&id).await.is_ok());
        assert!(second.status(&id).await.is_err());
        assert_eq!(first.clone().len().await, 1);
        assert!(second.is_empty().await);
        Ok(())
    }
}
