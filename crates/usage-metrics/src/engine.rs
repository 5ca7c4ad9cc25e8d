use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregation::AggregationTable;
use crate::events::MetricEvent;
use crate::pricing::PriceTable;
use crate::sink::IngestionSink;
use crate::types::IntervalMetricRecord;

/// Environment flag that forces one-second reduction intervals
pub const DEFAULT_UNIT_INTERVAL_ENV: &str = "AGENTLESS_MODE_ENABLED";

/// External switch that may force the reduction interval to one second.
///
/// Read on every `reduce` call, never cached.
#[derive(Debug, Clone, Default)]
pub enum IntervalOverride {
    #[default]
    Never,
    /// Forced while the named environment variable is set (any value)
    EnvVar(String),
    /// Forced while the shared flag is true
    Flag(Arc<AtomicBool>),
}

impl IntervalOverride {
    pub fn forces_unit_interval(&self) -> bool {
        match self {
            Self::Never => false,
            Self::EnvVar(name) => std::env::var_os(name).is_some(),
            Self::Flag(flag) => flag.load(Ordering::SeqCst),
        }
    }

    pub fn effective_interval(&self, nominal_secs: u64) -> u64 {
        if self.forces_unit_interval() {
            1
        } else {
            nominal_secs.max(1)
        }
    }
}

/// Delta-safe aggregation engine: ingestion sink plus the state it reduces into.
///
/// Producers call `submit` from any thread; one consumer calls `reduce` once
/// per exporter cycle.
pub struct UsageEngine {
    sink: IngestionSink,
    table: Mutex<AggregationTable>,
    prices: PriceTable,
    interval_override: IntervalOverride,
}

impl UsageEngine {
    pub fn new(prices: PriceTable) -> Self {
        Self::with_sink(IngestionSink::new(), prices)
    }

    pub fn with_sink(sink: IngestionSink, prices: PriceTable) -> Self {
        Self {
            sink,
            table: Mutex::new(AggregationTable::new()),
            prices,
            interval_override: IntervalOverride::Never,
        }
    }

    pub fn with_interval_override(mut self, interval_override: IntervalOverride) -> Self {
        self.interval_override = interval_override;
        self
    }

    /// Queue an observation for the next cycle
    pub fn submit(&self, event: MetricEvent) -> bool {
        self.sink.submit(event)
    }

    pub fn sink(&self) -> &IngestionSink {
        &self.sink
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Number of entities with recorded state
    pub fn entity_count(&self) -> usize {
        self.lock_table().len()
    }

    /// Run one reduction cycle over `interval_secs` of nominal time.
    ///
    /// Emits one record for every entity ever observed, including entities
    /// without events this cycle, then zeroes all pending deltas.
    pub fn reduce(&self, interval_secs: u64) -> Vec<IntervalMetricRecord> {
        let events = self.sink.drain();
        let interval = self.interval_override.effective_interval(interval_secs) as f64;

        let mut table = self.lock_table();
        for event in &events {
            table.fold(event);
        }

        let mut records = Vec::with_capacity(table.len());
        for (entity_id, state) in table.iter_mut() {
            let avg_duration = state.avg_duration();
            let max_duration = state.track_max_avg_duration(avg_duration);

            let prompt_rate = state.delta_prompt_tokens() as f64 / interval;
            let complete_rate = state.delta_complete_tokens() as f64 / interval;
            let requests_rate = state.delta_request_count() as f64 / interval;
            let cost_rate = self
                .prices
                .cost_per_second(state.ai_system(), prompt_rate, complete_rate);

            records.push(IntervalMetricRecord {
                entity_id: entity_id.clone(),
                ai_system: state.ai_system().to_string(),
                avg_duration,
                max_duration,
                prompt_tokens_per_second: prompt_rate,
                complete_tokens_per_second: complete_rate,
                tokens_per_second: prompt_rate + complete_rate,
                cost_per_second: cost_rate,
                requests_per_second: requests_rate,
            });

            state.reset_deltas();
        }
        drop(table);

        records.sort_by(|left, right| left.entity_id.cmp(&right.entity_id));
        log::debug!(
            "Reduced {} events into {} entity records over {}s",
            events.len(),
            records.len(),
            interval
        );
        records
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, AggregationTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::TokenPrice;

    fn engine() -> UsageEngine {
        UsageEngine::new(PriceTable::new())
    }

    #[test]
    fn entity_without_events_emits_zero_record() {
        let engine = engine();
        engine.submit(
            MetricEvent::new("m1", "openai")
                .with_tokens(100, 50)
                .with_duration_ms(2000)
                .with_request_count(1),
        );
        engine.reduce(10);

        let records = engine.reduce(10);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.avg_duration, 0);
        assert_eq!(record.max_duration, 2000);
        assert_eq!(record.tokens_per_second, 0.0);
        assert_eq!(record.requests_per_second, 0.0);
    }

    #[test]
    fn override_flag_is_read_every_cycle() {
        let flag = Arc::new(AtomicBool::new(true));
        let engine = engine().with_interval_override(IntervalOverride::Flag(Arc::clone(&flag)));

        engine.submit(MetricEvent::new("m1", "openai").with_tokens(100, 0).with_request_count(1));
        let forced = engine.reduce(10);
        assert_eq!(forced[0].prompt_tokens_per_second, 100.0);

        flag.store(false, Ordering::SeqCst);
        engine.submit(MetricEvent::new("m1", "openai").with_tokens(200, 0).with_request_count(2));
        let nominal = engine.reduce(10);
        assert_eq!(nominal[0].prompt_tokens_per_second, 10.0);
    }

    #[test]
    fn env_override_forces_unit_interval() {
        let name = "USAGE_METRICS_TEST_UNIT_INTERVAL";
        let interval_override = IntervalOverride::EnvVar(name.to_string());

        std::env::remove_var(name);
        assert_eq!(interval_override.effective_interval(30), 30);
        std::env::set_var(name, "true");
        assert_eq!(interval_override.effective_interval(30), 1);
        std::env::remove_var(name);
    }

    #[test]
    fn zero_interval_is_treated_as_one_second() {
        assert_eq!(IntervalOverride::Never.effective_interval(0), 1);
    }

    #[test]
    fn cost_uses_entity_source_price() {
        let prices = PriceTable::new().with_price(
            "watsonx",
            TokenPrice {
                prompt_per_1k: 1.0,
                complete_per_1k: 2.0,
            },
        );
        let engine = UsageEngine::new(prices);
        engine.submit(
            MetricEvent::new("granite", "watsonx")
                .with_tokens(1000, 500)
                .with_request_count(1),
        );
        engine.submit(
            MetricEvent::new("gpt-4", "openai")
                .with_tokens(1000, 500)
                .with_request_count(1),
        );

        let records = engine.reduce(1);
        let granite = records.iter().find(|r| r.entity_id == "granite").expect("granite");
        let gpt = records.iter().find(|r| r.entity_id == "gpt-4").expect("gpt-4");
        assert!((granite.cost_per_second - 2.0).abs() < 1e-9);
        assert_eq!(gpt.cost_per_second, 0.0);
    }

    #[test]
    fn records_are_sorted_by_entity() {
        let engine = engine();
        for entity in ["c", "a", "b"] {
            engine.submit(MetricEvent::new(entity, "openai").with_request_count(1));
        }
        let ids: Vec<_> = engine.reduce(5).into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(engine.entity_count(), 3);
    }
}
