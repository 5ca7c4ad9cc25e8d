use serde::{Deserialize, Serialize};

/// Interval-rate metrics for one entity over one reduction cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalMetricRecord {
    pub entity_id: String,
    pub ai_system: String,
    /// Average duration per request in this cycle, ms
    pub avg_duration: u64,
    /// Largest per-cycle average seen for this entity so far, ms
    pub max_duration: u64,
    pub prompt_tokens_per_second: f64,
    pub complete_tokens_per_second: f64,
    /// Prompt plus completion tokens per second
    pub tokens_per_second: f64,
    pub cost_per_second: f64,
    pub requests_per_second: f64,
}

/// One labeled entry of a multi-row metric (e.g. one per table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: f64,
}

impl LabeledValue {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Value exported for a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Scalar(f64),
    Labeled(Vec<LabeledValue>),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Labeled(_) => None,
        }
    }

    pub fn as_labeled(&self) -> Option<&[LabeledValue]> {
        match self {
            Self::Scalar(_) => None,
            Self::Labeled(values) => Some(values),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

/// How a collected cumulative value becomes the exported value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    /// Export the collected value as-is
    #[default]
    Direct,
    /// Export the per-second change between consecutive samples
    Rate,
}

/// Address of an exported value: a metric name and an optional data point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub name: String,
    pub point: Option<String>,
}

impl MetricKey {
    pub fn metric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            point: None,
        }
    }

    pub fn point(name: impl Into<String>, point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            point: Some(point.into()),
        }
    }
}
