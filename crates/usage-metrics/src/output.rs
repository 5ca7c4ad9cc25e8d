use std::sync::{RwLock, RwLockReadGuard};

use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::{MetricKey, MetricValue};

#[derive(Debug, Clone, Copy)]
struct RateSample {
    cumulative: f64,
    at: Instant,
}

/// Result of recording a cumulative sample in rate mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateOutcome {
    /// A per-second rate was exported
    Exported(f64),
    /// The sample only (re)set the baseline; the previous rate stays exported
    Baseline,
    /// The sink is closed
    Rejected,
}

impl RateOutcome {
    pub fn is_exported(&self) -> bool {
        matches!(self, Self::Exported(_))
    }
}

/// Latest exported value per metric, shared by every collection tier.
///
/// Writers on different tiers may record concurrently. Writes hold the read
/// side of `closed` across the insert and `close` takes the write side, so
/// once `close` returns no write can land.
#[derive(Debug, Default)]
pub struct MetricSink {
    values: DashMap<MetricKey, MetricValue>,
    rate_samples: DashMap<MetricKey, RateSample>,
    closed: RwLock<bool>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, value: MetricValue) -> bool {
        self.write(MetricKey::metric(name), value)
    }

    /// Record one data point (e.g. one entity) of a metric
    pub fn record_point(&self, name: &str, point: &str, value: f64) -> bool {
        self.write(MetricKey::point(name, point), MetricValue::Scalar(value))
    }

    /// Record a cumulative sample and export its per-second rate.
    ///
    /// The first sample only sets the baseline. A sample that is not later
    /// than, or lower than, the previous one replaces the baseline without
    /// exporting; the previously exported rate stays in place.
    pub fn record_rate(&self, name: &str, cumulative: f64, at: Instant) -> RateOutcome {
        let closed = self.read_closed();
        if *closed {
            log::debug!("Metric sink closed, rejected rate sample for {}", name);
            return RateOutcome::Rejected;
        }

        let key = MetricKey::metric(name);
        let previous = self
            .rate_samples
            .insert(key.clone(), RateSample { cumulative, at });

        let Some(previous) = previous else {
            return RateOutcome::Baseline;
        };

        let elapsed = at.saturating_duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 || cumulative < previous.cumulative {
            log::debug!(
                "Skipping rate for {}: elapsed {}s, {} -> {}",
                name,
                elapsed,
                previous.cumulative,
                cumulative
            );
            return RateOutcome::Baseline;
        }

        let rate = (cumulative - previous.cumulative) / elapsed;
        self.values.insert(key, MetricValue::Scalar(rate));
        drop(closed);
        RateOutcome::Exported(rate)
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values
            .get(&MetricKey::metric(name))
            .map(|entry| entry.value().clone())
    }

    pub fn get_point(&self, name: &str, point: &str) -> Option<f64> {
        self.values
            .get(&MetricKey::point(name, point))
            .and_then(|entry| entry.value().as_scalar())
    }

    /// Every exported value, ordered by key
    pub fn snapshot(&self) -> Vec<(MetricKey, MetricValue)> {
        let mut values: Vec<_> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        values.sort_by(|left, right| left.0.cmp(&right.0));
        values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reject all further writes. Waits for writes already in progress.
    pub fn close(&self) {
        let mut closed = self
            .closed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *closed = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.read_closed()
    }

    fn read_closed(&self) -> RwLockReadGuard<'_, bool> {
        self.closed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, key: MetricKey, value: MetricValue) -> bool {
        let closed = self.read_closed();
        if *closed {
            log::debug!("Metric sink closed, rejected write to {:?}", key);
            return false;
        }
        self.values.insert(key, value);
        drop(closed);
        true
    }
}
