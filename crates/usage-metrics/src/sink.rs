use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::MetricEvent;

/// Thread-safe buffer between event producers and the reduction cycle
///
/// Producers call `submit` concurrently; the single consumer calls `drain`
/// once per cycle. A drain swaps the whole buffer out under the lock, so
/// every submitted event lands in exactly one drain batch.
pub struct IngestionSink {
    pending: Mutex<Vec<MetricEvent>>,
    capacity: Option<usize>,
    dropped: Arc<AtomicU64>,
}

impl IngestionSink {
    /// Create an unbounded sink
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            capacity: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a sink holding at most `capacity` pending events
    ///
    /// Submits beyond the capacity are rejected and counted in the
    /// `dropped` counter.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            capacity: Some(capacity),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submit an event for the next cycle
    ///
    /// Returns `false` if the sink is full and the event was dropped.
    pub fn submit(&self, event: MetricEvent) -> bool {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(capacity) = self.capacity {
            if pending.len() >= capacity {
                drop(pending);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "Ingestion sink full ({} pending), dropped event for {} ({} dropped so far)",
                    capacity,
                    event.entity_id,
                    dropped
                );
                return false;
            }
        }

        pending.push(event);
        true
    }

    /// Atomically take every pending event, leaving the sink empty
    pub fn drain(&self) -> Vec<MetricEvent> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *pending)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of events waiting for the next drain
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Get the number of dropped events since the sink was created
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Get a clone of the dropped counter for monitoring
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl Default for IngestionSink {
    fn default() -> Self {
        Self::new()
    }
}
