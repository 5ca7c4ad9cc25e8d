use crate::output::MetricSink;
use crate::types::{IntervalMetricRecord, MetricValue};

pub const LLM_STATUS_NAME: &str = "llm.status";
pub const LLM_DURATION_NAME: &str = "llm.duration";
pub const LLM_DURATION_MAX_NAME: &str = "llm.duration.max";
pub const LLM_COST_NAME: &str = "llm.cost";
pub const LLM_TOKEN_NAME: &str = "llm.tokens";
pub const LLM_REQ_COUNT_NAME: &str = "llm.request.count";

/// Write one cycle's records into the sink, one data point per entity.
///
/// Returns the number of records written; zero once the sink is closed.
pub fn publish_records(sink: &MetricSink, records: &[IntervalMetricRecord]) -> usize {
    if !sink.record(LLM_STATUS_NAME, MetricValue::Scalar(1.0)) {
        return 0;
    }

    let mut written = 0;
    for record in records {
        let entity = record.entity_id.as_str();
        let accepted = sink.record_point(LLM_DURATION_NAME, entity, record.avg_duration as f64)
            && sink.record_point(LLM_DURATION_MAX_NAME, entity, record.max_duration as f64)
            && sink.record_point(LLM_COST_NAME, entity, record.cost_per_second)
            && sink.record_point(LLM_TOKEN_NAME, entity, record.tokens_per_second)
            && sink.record_point(LLM_REQ_COUNT_NAME, entity, record.requests_per_second);
        if !accepted {
            break;
        }
        written += 1;
    }
    written
}

/// Log the per-entity summary of one cycle
pub fn log_records(records: &[IntervalMetricRecord]) {
    for record in records {
        log::info!(
            "Metrics for model {} of {}: avg duration {} ms, max duration {} ms, \
             tokens {:.3}/s, cost {:.6}/s, requests {:.3}/s",
            record.entity_id,
            record.ai_system,
            record.avg_duration,
            record.max_duration,
            record.tokens_per_second,
            record.cost_per_second,
            record.requests_per_second
        );
    }
}
