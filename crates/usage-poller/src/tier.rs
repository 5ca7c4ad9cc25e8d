use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use usage_metrics::{CalculationMode, MetricSink, MetricValue, RateOutcome};

use crate::dispatcher::{CollectTarget, MetricDispatcher};
use crate::error::{CollectError, CollectResult, FailureKind};
use crate::executor::CommandExecutor;
use crate::scheduler::TierTask;
use crate::session::{ConnectionProvider, DbSession};

/// A metric collected by a tier, and how its value is exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricBinding {
    pub metric_id: String,
    #[serde(default)]
    pub mode: CalculationMode,
}

impl MetricBinding {
    pub fn direct(metric_id: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            mode: CalculationMode::Direct,
        }
    }

    pub fn rate(metric_id: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            mode: CalculationMode::Rate,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub collected: Vec<String>,
    pub failed: Vec<(String, FailureKind)>,
    /// Rate metrics whose sample only set the baseline
    pub baseline: Vec<String>,
    /// Values collected but refused by a closed sink
    pub rejected: usize,
}

enum Export {
    Written,
    Baseline,
    Rejected,
}

/// Scheduler task collecting a fixed set of metrics through the dispatcher.
///
/// Each tick acquires its own session (only when a query metric is bound),
/// collects every metric against it, and drops it before the tick returns.
pub struct CollectionTier {
    name: String,
    metrics: Vec<MetricBinding>,
    dispatcher: Arc<MetricDispatcher>,
    connections: Option<Arc<dyn ConnectionProvider>>,
    executor: Arc<dyn CommandExecutor>,
    sink: Arc<MetricSink>,
    status_metric: Option<String>,
}

impl CollectionTier {
    pub fn new(
        name: impl Into<String>,
        metrics: Vec<MetricBinding>,
        dispatcher: Arc<MetricDispatcher>,
        executor: Arc<dyn CommandExecutor>,
        sink: Arc<MetricSink>,
    ) -> Self {
        Self {
            name: name.into(),
            metrics,
            dispatcher,
            connections: None,
            executor,
            sink,
            status_metric: None,
        }
    }

    pub fn with_connections(mut self, connections: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = Some(connections);
        self
    }

    /// Metric set to 1 on every tick whose session was acquired
    pub fn with_status_metric(mut self, name: impl Into<String>) -> Self {
        self.status_metric = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &[MetricBinding] {
        &self.metrics
    }

    fn needs_session(&self) -> bool {
        self.metrics.iter().any(|binding| {
            self.dispatcher
                .get(&binding.metric_id)
                .map(|strategy| strategy.needs_connection())
                .unwrap_or(false)
        })
    }

    async fn open_session(&self) -> CollectResult<Option<DbSession>> {
        if !self.needs_session() {
            return Ok(None);
        }
        let provider = self.connections.as_ref().ok_or_else(|| {
            CollectError::Configuration(format!(
                "tier '{}' has query metrics but no database",
                self.name
            ))
        })?;
        provider.acquire().await.map(Some)
    }

    /// Collect every bound metric once
    pub async fn collect_once(&self) -> CollectResult<TickReport> {
        let session = self.open_session().await?;
        let mut report = TickReport::default();

        if let (Some(_), Some(status_metric)) = (&session, &self.status_metric) {
            self.sink.record(status_metric, MetricValue::Scalar(1.0));
        }

        let target = CollectTarget {
            session: session.as_ref(),
            executor: self.executor.as_ref(),
        };

        for binding in &self.metrics {
            let collected = self
                .dispatcher
                .collect(&binding.metric_id, &target)
                .await
                .and_then(|value| self.export(binding, value));

            match collected {
                Ok(Export::Written) => report.collected.push(binding.metric_id.clone()),
                Ok(Export::Baseline) => report.baseline.push(binding.metric_id.clone()),
                Ok(Export::Rejected) => report.rejected += 1,
                Err(collect_error) => {
                    warn!(
                        "Tier {}: skipping {} this cycle ({}): {}",
                        self.name,
                        binding.metric_id,
                        collect_error.kind(),
                        collect_error
                    );
                    report
                        .failed
                        .push((binding.metric_id.clone(), collect_error.kind()));
                }
            }
        }

        drop(session);
        Ok(report)
    }

    fn export(&self, binding: &MetricBinding, value: MetricValue) -> CollectResult<Export> {
        match (binding.mode, value) {
            (CalculationMode::Direct, value) => {
                if self.sink.record(&binding.metric_id, value) {
                    Ok(Export::Written)
                } else {
                    Ok(Export::Rejected)
                }
            }
            (CalculationMode::Rate, MetricValue::Scalar(cumulative)) => {
                let outcome = self.sink.record_rate(
                    &binding.metric_id,
                    cumulative,
                    tokio::time::Instant::now(),
                );
                Ok(match outcome {
                    RateOutcome::Exported(_) => Export::Written,
                    RateOutcome::Baseline => Export::Baseline,
                    RateOutcome::Rejected => Export::Rejected,
                })
            }
            (CalculationMode::Rate, MetricValue::Labeled(_)) => Err(CollectError::MalformedInput(
                "rate mode needs a scalar value".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TierTask for CollectionTier {
    async fn run(&self) -> anyhow::Result<()> {
        let report = self.collect_once().await?;
        debug!(
            "Tier {}: {} collected, {} baseline, {} failed, {} rejected",
            self.name,
            report.collected.len(),
            report.baseline.len(),
            report.failed.len(),
            report.rejected
        );
        Ok(())
    }
}
