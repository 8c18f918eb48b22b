//! Run event emission and streaming.
//!
//! Events are appended to the store first (assigning the per-run sequence
//! number) and only then broadcast to live subscribers, so no consumer can
//! observe an event whose backing record is not yet readable. Consumers that
//! connect mid-run replay from the store at any offset and then follow the
//! live channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{EventSeverity, RunEvent, RunStep};
use crate::store::{ArtifactStore, StoreResult};

/// Broadcast capacity; slow consumers fall back to store replay on lag.
const CHANNEL_CAPACITY: usize = 256;

/// Store-backed event emitter with a live broadcast channel.
pub struct EventEmitter {
    store: Arc<dyn ArtifactStore>,
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, sender }
    }

    /// Append one event to the run's log and publish it. Persist-then-publish
    /// ordering is what gives the event/artifact causality guarantee.
    pub fn emit(
        &self,
        run_id: &str,
        step: RunStep,
        severity: EventSeverity,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> StoreResult<RunEvent> {
        let event = self
            .store
            .append_event(run_id, step, severity, message.into(), payload)?;
        debug!(run_id, step = %event.step, seq = event.seq, "run event");
        // No receivers is fine; the record is already persisted.
        let _ = self.sender.send(event.clone());
        Ok(event)
    }

    /// Convenience wrapper for informational progress events.
    pub fn info(
        &self,
        run_id: &str,
        step: RunStep,
        message: impl Into<String>,
    ) -> StoreResult<RunEvent> {
        self.emit(run_id, step, EventSeverity::Info, message, serde_json::Value::Null)
    }

    /// Subscribe to live events across all runs; filter by `run_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Replay persisted events for a run starting at `offset`.
    pub fn replay(&self, run_id: &str, offset: u64) -> StoreResult<Vec<RunEvent>> {
        self.store.events_since(run_id, offset)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
