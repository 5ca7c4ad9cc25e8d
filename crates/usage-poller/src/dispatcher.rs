use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;
use usage_metrics::MetricValue;

use crate::error::{CollectError, CollectResult};
use crate::executor::CommandExecutor;
use crate::session::DbSession;
use crate::strategy::CollectionStrategy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("metric '{0}' already registered")]
    DuplicateMetric(String),

    #[error("invalid metric '{metric}': {reason}")]
    InvalidMetric { metric: String, reason: String },
}

/// What a strategy may use during one tick
pub struct CollectTarget<'a> {
    /// Session acquired for the tick, if the tier has query metrics
    pub session: Option<&'a DbSession>,
    pub executor: &'a dyn CommandExecutor,
}

/// Registry mapping metric ids to their collection strategy.
///
/// Built at startup; strategies only enter through `register`.
pub struct MetricDispatcher {
    strategies: DashMap<String, Arc<CollectionStrategy>>,
}

impl Default for MetricDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricDispatcher {
    pub fn new() -> Self {
        Self {
            strategies: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        metric_id: &str,
        strategy: CollectionStrategy,
    ) -> Result<(), RegistryError> {
        let metric_id = metric_id.trim();
        if metric_id.is_empty() {
            return Err(RegistryError::InvalidMetric {
                metric: metric_id.to_string(),
                reason: "metric id cannot be empty".to_string(),
            });
        }

        strategy
            .validate()
            .map_err(|reason| RegistryError::InvalidMetric {
                metric: metric_id.to_string(),
                reason,
            })?;

        match self.strategies.entry(metric_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateMetric(metric_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(strategy));
                Ok(())
            }
        }
    }

    pub fn get(&self, metric_id: &str) -> Option<Arc<CollectionStrategy>> {
        self.strategies
            .get(metric_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, metric_id: &str) -> bool {
        self.strategies.contains_key(metric_id)
    }

    pub fn metric_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .strategies
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Collect one metric. A failure concerns this metric only.
    pub async fn collect(
        &self,
        metric_id: &str,
        target: &CollectTarget<'_>,
    ) -> CollectResult<MetricValue> {
        let strategy = self
            .get(metric_id)
            .ok_or_else(|| CollectError::UnknownMetric(metric_id.to_string()))?;

        match strategy.as_ref() {
            CollectionStrategy::Query(query) => {
                let session = target.session.ok_or_else(|| {
                    CollectError::Configuration(format!(
                        "metric '{}' needs a database session",
                        metric_id
                    ))
                })?;
                query.collect(session).await
            }
            CollectionStrategy::Command(command) => command.collect(target.executor).await,
        }
    }
}
