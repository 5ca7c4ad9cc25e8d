use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cumulative usage observation pushed by a call-site producer.
///
/// All counters are cumulative since the producer's own last restart. The
/// event is consumed exactly once, by the next reduction cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Aggregation key (e.g. the model id)
    pub entity_id: String,
    /// Source system used for price lookups (e.g. "openai")
    pub ai_system: String,
    pub cumulative_prompt_tokens: u64,
    pub cumulative_complete_tokens: u64,
    pub cumulative_duration_ms: u64,
    pub cumulative_request_count: u64,
    /// When the producer took the observation
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn new(entity_id: impl Into<String>, ai_system: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ai_system: ai_system.into(),
            cumulative_prompt_tokens: 0,
            cumulative_complete_tokens: 0,
            cumulative_duration_ms: 0,
            cumulative_request_count: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, prompt: u64, complete: u64) -> Self {
        self.cumulative_prompt_tokens = prompt;
        self.cumulative_complete_tokens = complete;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.cumulative_duration_ms = duration_ms;
        self
    }

    pub fn with_request_count(mut self, request_count: u64) -> Self {
        self.cumulative_request_count = request_count;
        self
    }
}
