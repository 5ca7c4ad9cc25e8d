use std::collections::HashMap;

use crate::events::MetricEvent;

/// Delta tracker for one cumulative, restart-prone counter.
///
/// A request count of 1 marks a fresh window (the producer may have
/// restarted) and credits the whole value. Otherwise only growth over a
/// known non-zero previous value is credited; regressions credit nothing.
/// A zero observation is ignored entirely.
///
/// A producer whose request counter restarts without passing through 1 is
/// indistinguishable from a regression and gets no credit for that cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeCounter {
    last: u64,
    delta: u64,
}

impl CumulativeCounter {
    pub fn observe(&mut self, current: u64, request_count: u64) {
        if current == 0 {
            return;
        }

        let credited = if request_count == 1 {
            current
        } else if current > self.last && self.last != 0 {
            current - self.last
        } else {
            0
        };

        self.last = current;
        self.delta = self.delta.saturating_add(credited);
    }

    /// The request counter is deltaed against its own history.
    pub fn observe_self(&mut self, current: u64) {
        self.observe(current, current);
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn delta(&self) -> u64 {
        self.delta
    }

    pub fn reset_delta(&mut self) {
        self.delta = 0;
    }
}

/// Per-entity aggregation state, kept for the lifetime of the owning table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationState {
    ai_system: String,
    prompt_tokens: CumulativeCounter,
    complete_tokens: CumulativeCounter,
    duration: CumulativeCounter,
    request_count: CumulativeCounter,
    max_avg_duration: u64,
}

impl AggregationState {
    pub fn new(ai_system: impl Into<String>) -> Self {
        Self {
            ai_system: ai_system.into(),
            ..Default::default()
        }
    }

    /// Fold one cumulative observation into the pending deltas
    pub fn fold(&mut self, event: &MetricEvent) {
        // Duration goes first, against the raw request count of the event
        self.duration
            .observe(event.cumulative_duration_ms, event.cumulative_request_count);
        self.request_count
            .observe_self(event.cumulative_request_count);

        let request_count = self.request_count.last();
        self.prompt_tokens
            .observe(event.cumulative_prompt_tokens, request_count);
        self.complete_tokens
            .observe(event.cumulative_complete_tokens, request_count);
    }

    /// Average duration per request over the pending deltas, in ms
    pub fn avg_duration(&self) -> u64 {
        match self.request_count.delta() {
            0 => 0,
            requests => self.duration.delta() / requests,
        }
    }

    /// Raise the running maximum of per-cycle averages, never lowering it
    pub fn track_max_avg_duration(&mut self, avg_duration: u64) -> u64 {
        if avg_duration > self.max_avg_duration {
            self.max_avg_duration = avg_duration;
        }
        self.max_avg_duration
    }

    pub fn reset_deltas(&mut self) {
        self.prompt_tokens.reset_delta();
        self.complete_tokens.reset_delta();
        self.duration.reset_delta();
        self.request_count.reset_delta();
    }

    pub fn ai_system(&self) -> &str {
        &self.ai_system
    }

    pub fn last_prompt_tokens(&self) -> u64 {
        self.prompt_tokens.last()
    }

    pub fn last_complete_tokens(&self) -> u64 {
        self.complete_tokens.last()
    }

    pub fn last_duration(&self) -> u64 {
        self.duration.last()
    }

    pub fn last_request_count(&self) -> u64 {
        self.request_count.last()
    }

    pub fn delta_prompt_tokens(&self) -> u64 {
        self.prompt_tokens.delta()
    }

    pub fn delta_complete_tokens(&self) -> u64 {
        self.complete_tokens.delta()
    }

    pub fn delta_duration(&self) -> u64 {
        self.duration.delta()
    }

    pub fn delta_request_count(&self) -> u64 {
        self.request_count.delta()
    }

    pub fn max_avg_duration(&self) -> u64 {
        self.max_avg_duration
    }
}

/// Aggregation state for every entity observed so far.
///
/// Entities are never evicted; a source that stops reporting keeps its
/// entry (and keeps emitting zero-delta records).
#[derive(Debug, Default)]
pub struct AggregationTable {
    entities: HashMap<String, AggregationState>,
}

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into its entity's state, creating the state on first sight
    pub fn fold(&mut self, event: &MetricEvent) {
        self.entities
            .entry(event.entity_id.clone())
            .or_insert_with(|| AggregationState::new(event.ai_system.clone()))
            .fold(event);
    }

    pub fn get(&self, entity_id: &str) -> Option<&AggregationState> {
        self.entities.get(entity_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut AggregationState)> {
        self.entities.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
