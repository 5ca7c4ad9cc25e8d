use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, info};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Body of one tier tick
#[async_trait]
pub trait TierTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

pub type SharedTierTask = Arc<dyn TierTask>;

/// Adapts an async closure into a tier task
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> TierTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

pub fn task_fn<F, Fut>(func: F) -> SharedTierTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask(func))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("tier '{0}' already registered")]
    DuplicateTier(String),

    #[error("tier '{0}' must have a non-zero interval")]
    ZeroInterval(String),

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Run counters of one tier
#[derive(Debug, Default)]
pub struct TierStats {
    runs: AtomicU64,
    failures: AtomicU64,
}

impl TierStats {
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// An independently scheduled unit of collection
pub struct PollingTier {
    pub name: String,
    pub interval: Duration,
    pub task: SharedTierTask,
    stats: Arc<TierStats>,
}

/// Runs every registered tier on its own timer.
///
/// Each tier repeats with fixed-delay semantics: the next tick is scheduled
/// `interval` after the previous tick finished, so a slow tick delays only
/// its own tier. A failing or panicking tick is logged and the tier keeps
/// its schedule.
pub struct TierScheduler {
    tiers: Vec<PollingTier>,
    initial_delay: Duration,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for TierScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TierScheduler {
    pub fn new() -> Self {
        Self::with_initial_delay(DEFAULT_INITIAL_DELAY)
    }

    pub fn with_initial_delay(initial_delay: Duration) -> Self {
        Self {
            tiers: Vec::new(),
            initial_delay,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn register_tier(
        &mut self,
        name: &str,
        interval_secs: u64,
        task: SharedTierTask,
    ) -> Result<(), SchedulerError> {
        self.register_tier_every(name, Duration::from_secs(interval_secs), task)
    }

    pub fn register_tier_every(
        &mut self,
        name: &str,
        interval: Duration,
        task: SharedTierTask,
    ) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyStarted);
        }
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(name.to_string()));
        }
        if self.tiers.iter().any(|tier| tier.name == name) {
            return Err(SchedulerError::DuplicateTier(name.to_string()));
        }

        self.tiers.push(PollingTier {
            name: name.to_string(),
            interval,
            task,
            stats: Arc::new(TierStats::default()),
        });
        Ok(())
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|tier| tier.name.as_str()).collect()
    }

    pub fn stats(&self, name: &str) -> Option<Arc<TierStats>> {
        self.tiers
            .iter()
            .find(|tier| tier.name == name)
            .map(|tier| Arc::clone(&tier.stats))
    }

    pub fn all_stats(&self) -> HashMap<String, Arc<TierStats>> {
        self.tiers
            .iter()
            .map(|tier| (tier.name.clone(), Arc::clone(&tier.stats)))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn one timer task per tier. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running() || self.cancel.is_cancelled() {
            return Err(SchedulerError::AlreadyStarted);
        }

        for tier in &self.tiers {
            info!(
                "Starting {} polling tier every {}s",
                tier.name,
                tier.interval.as_secs_f64()
            );
            self.handles.push(tokio::spawn(run_tier(
                tier.name.clone(),
                tier.interval,
                self.initial_delay,
                Arc::clone(&tier.task),
                Arc::clone(&tier.stats),
                self.cancel.child_token(),
            )));
        }
        Ok(())
    }

    /// Stop scheduling new ticks and wait for in-flight ticks to finish
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(join_error) = handle.await {
                error!("Polling tier task ended abnormally: {}", join_error);
            }
        }
        info!("All polling tiers stopped");
    }
}

async fn run_tier(
    name: String,
    interval: Duration,
    initial_delay: Duration,
    task: SharedTierTask,
    stats: Arc<TierStats>,
    cancel: CancellationToken,
) {
    let mut delay = initial_delay;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        stats.runs.fetch_add(1, Ordering::Relaxed);
        match AssertUnwindSafe(task.run()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(task_error)) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                error!("Tier {} tick failed: {:#}", name, task_error);
            }
            Err(panic) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                error!("Tier {} tick panicked: {}", name, panic_message(panic.as_ref()));
            }
        }

        delay = interval;
    }
    info!("Polling tier {} stopped", name);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
