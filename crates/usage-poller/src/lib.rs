//! Tiered polling of database metrics.
//!
//! Metrics are registered with a [`MetricDispatcher`] as query or command
//! strategies, grouped into tiers by [`plan_tiers`] and run on independent
//! timers by the [`TierScheduler`].

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod plan;
pub mod scheduler;
pub mod session;
pub mod strategy;
pub mod tier;

pub use dispatcher::{CollectTarget, MetricDispatcher, RegistryError};
pub use error::{CollectError, CollectResult, FailureKind};
pub use executor::{CommandExecutor, ProcessExecutor, DEFAULT_PROBE_TIMEOUT_SECS};
pub use plan::{
    plan_tiers, register_definitions, MetricDefinition, PlanError, TierLevel, TierPlan,
    DEFAULT_TIER_NAME,
};
pub use scheduler::{
    task_fn, SchedulerError, SharedTierTask, TierScheduler, TierStats, TierTask,
    DEFAULT_INITIAL_DELAY,
};
pub use session::{ConnectionProvider, DbSession, SqliteConnectionProvider};
pub use strategy::{
    CollectionStrategy, CommandStrategy, FieldSelector, QueryStrategy, RatioSelector, ResultShape,
    TokenCount,
};
pub use tier::{CollectionTier, MetricBinding, TickReport};
