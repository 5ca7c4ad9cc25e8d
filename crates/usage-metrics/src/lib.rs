pub mod aggregation;
pub mod engine;
pub mod events;
pub mod output;
pub mod pricing;
pub mod publish;
pub mod sink;
pub mod types;

pub use aggregation::{AggregationState, AggregationTable, CumulativeCounter};
pub use engine::{IntervalOverride, UsageEngine, DEFAULT_UNIT_INTERVAL_ENV};
pub use events::MetricEvent;
pub use output::{MetricSink, RateOutcome};
pub use pricing::{PriceTable, TokenPrice};
pub use publish::{log_records, publish_records};
pub use sink::IngestionSink;
pub use types::{CalculationMode, IntervalMetricRecord, LabeledValue, MetricKey, MetricValue};
