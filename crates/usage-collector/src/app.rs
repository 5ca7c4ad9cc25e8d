use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use usage_metrics::{
    log_records, publish_records, IngestionSink, IntervalOverride, MetricSink, UsageEngine,
};
use usage_poller::{
    plan_tiers, register_definitions, task_fn, CollectionTier, CommandExecutor,
    ConnectionProvider, MetricDispatcher, ProcessExecutor, SqliteConnectionProvider,
    TierScheduler,
};

use crate::config::{Config, ConfigError};

pub const AGGREGATION_TIER_NAME: &str = "aggregation";
pub const DB_STATUS_NAME: &str = "db.status";

fn ingestion_sink(config: &Config) -> IngestionSink {
    match config.max_pending_events {
        Some(capacity) => IngestionSink::with_capacity(capacity),
        None => IngestionSink::new(),
    }
}

/// The assembled collector: usage engine, metric sink and tier scheduler
pub struct Collector {
    engine: Arc<UsageEngine>,
    sink: Arc<MetricSink>,
    scheduler: TierScheduler,
}

impl Collector {
    /// Wire every component from the configuration. Any invalid metric,
    /// tier or missing database fails here, before scheduling begins.
    pub fn build(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let engine = Arc::new(
            UsageEngine::with_sink(ingestion_sink(config), config.prices.clone())
                .with_interval_override(IntervalOverride::EnvVar(
                    config.unit_interval_env.clone(),
                )),
        );
        let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new(
            config.probes.script_dir.clone(),
            config.probes.timeout_secs,
        ));
        Self::build_with(config, engine, executor)
    }

    /// Like `build`, with the engine and probe executor supplied
    pub fn build_with(
        config: &Config,
        engine: Arc<UsageEngine>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self, ConfigError> {
        let sink = Arc::new(MetricSink::new());
        let dispatcher = Arc::new(MetricDispatcher::new());
        register_definitions(&dispatcher, &config.metrics)?;

        let plans = plan_tiers(
            config.poll_interval,
            &config.custom_poll_interval,
            &config.metrics,
            config.database.is_some(),
        )?;

        let connections: Option<Arc<dyn ConnectionProvider>> = match &config.database {
            Some(db) => Some(Arc::new(SqliteConnectionProvider::new(&db.path))),
            None => None,
        };

        let mut scheduler =
            TierScheduler::with_initial_delay(Duration::from_millis(config.initial_delay_ms));

        for plan in plans {
            let mut tier = CollectionTier::new(
                plan.name.clone(),
                plan.metrics,
                Arc::clone(&dispatcher),
                Arc::clone(&executor),
                Arc::clone(&sink),
            );
            if let Some(connections) = &connections {
                tier = tier
                    .with_connections(Arc::clone(connections))
                    .with_status_metric(DB_STATUS_NAME);
            }
            info!(
                "Planned tier {} every {}s with {} metrics",
                plan.name,
                plan.interval_secs,
                tier.metrics().len()
            );
            scheduler.register_tier(&plan.name, plan.interval_secs, Arc::new(tier))?;
        }

        let callback_interval = config.callback_interval;
        let reduce_engine = Arc::clone(&engine);
        let reduce_sink = Arc::clone(&sink);
        let reported_drops = Arc::new(AtomicU64::new(0));
        scheduler.register_tier(
            AGGREGATION_TIER_NAME,
            callback_interval,
            task_fn(move || {
                let engine = Arc::clone(&reduce_engine);
                let reported_drops = Arc::clone(&reported_drops);
                let sink = Arc::clone(&reduce_sink);
                async move {
                    let dropped = engine.sink().dropped_count();
                    let previous = reported_drops.swap(dropped, Ordering::Relaxed);
                    if dropped > previous {
                        log::warn!(
                            "Ingestion sink full: {} usage events dropped this cycle",
                            dropped - previous
                        );
                    }
                    let records = engine.reduce(callback_interval);
                    log_records(&records);
                    publish_records(&sink, &records);
                    Ok(())
                }
            }),
        )?;

        Ok(Self {
            engine,
            sink,
            scheduler,
        })
    }

    /// Ingestion entry point shared with producers
    pub fn engine(&self) -> Arc<UsageEngine> {
        Arc::clone(&self.engine)
    }

    pub fn sink(&self) -> Arc<MetricSink> {
        Arc::clone(&self.sink)
    }

    pub fn scheduler(&self) -> &TierScheduler {
        &self.scheduler
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        self.scheduler.start()?;
        info!(
            "Collector started with tiers: {}",
            self.scheduler.tier_names().join(", ")
        );
        Ok(())
    }

    /// Reject further writes, then wait for every tier to wind down
    pub async fn shutdown(mut self) {
        self.sink.close();
        self.scheduler.stop().await;
        info!("Collector stopped");
    }
}
