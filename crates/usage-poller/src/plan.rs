use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use usage_metrics::CalculationMode;

use crate::dispatcher::{MetricDispatcher, RegistryError};
use crate::strategy::{CollectionStrategy, ResultShape};
use crate::tier::MetricBinding;

pub const DEFAULT_TIER_NAME: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown tier level '{0}' (expected short, medium or long)")]
    UnknownLevel(String),

    #[error("tier '{0}' must have a non-zero interval")]
    ZeroInterval(String),

    #[error("metrics {0:?} need a database but none is configured")]
    MissingDatabase(Vec<String>),

    #[error("metric '{0}' uses rate mode but does not produce a scalar")]
    RateNeedsScalar(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Polling frequency class of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierLevel {
    Short,
    Medium,
    Long,
}

impl TierLevel {
    pub const ALL: [TierLevel; 3] = [TierLevel::Short, TierLevel::Medium, TierLevel::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierLevel {
    type Err = PlanError;

    /// Accepts `high`/`low` as aliases for `long`/`short`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" | "low" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" | "high" => Ok(Self::Long),
            _ => Err(PlanError::UnknownLevel(s.to_string())),
        }
    }
}

fn default_level() -> String {
    TierLevel::Short.as_str().to_string()
}

/// One `[[metrics]]` entry of the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub mode: CalculationMode,
    #[serde(flatten)]
    pub strategy: CollectionStrategy,
}

impl MetricDefinition {
    pub fn new(id: impl Into<String>, level: TierLevel, strategy: CollectionStrategy) -> Self {
        Self {
            id: id.into(),
            level: level.as_str().to_string(),
            mode: CalculationMode::Direct,
            strategy,
        }
    }

    pub fn with_mode(mut self, mode: CalculationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tier_level(&self) -> Result<TierLevel, PlanError> {
        self.level.parse()
    }

    fn binding(&self) -> MetricBinding {
        MetricBinding {
            metric_id: self.id.clone(),
            mode: self.mode,
        }
    }
}

/// A tier to register with the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    pub name: String,
    pub interval_secs: u64,
    pub metrics: Vec<MetricBinding>,
}

impl TierPlan {
    pub fn needs_database(&self, definitions: &[MetricDefinition]) -> bool {
        self.metrics.iter().any(|binding| {
            definitions
                .iter()
                .any(|def| def.id == binding.metric_id && def.strategy.needs_connection())
        })
    }
}

/// Register every definition, rejecting the whole set on the first error
pub fn register_definitions(
    dispatcher: &MetricDispatcher,
    definitions: &[MetricDefinition],
) -> Result<(), PlanError> {
    for definition in definitions {
        if definition.mode == CalculationMode::Rate {
            if let CollectionStrategy::Query(query) = &definition.strategy {
                if query.shape == ResultShape::Labeled {
                    return Err(PlanError::RateNeedsScalar(definition.id.clone()));
                }
            }
        }
        dispatcher.register(&definition.id, definition.strategy.clone())?;
    }
    Ok(())
}

/// Group metric definitions into tiers.
///
/// Without custom intervals every metric runs in one `default` tier at
/// `poll_interval`. With them, each level gets its own tier; a level with
/// no configured interval uses `poll_interval`. Tiers without metrics are
/// left out.
pub fn plan_tiers(
    poll_interval: u64,
    custom_intervals: &BTreeMap<String, u64>,
    definitions: &[MetricDefinition],
    has_database: bool,
) -> Result<Vec<TierPlan>, PlanError> {
    let mut custom = BTreeMap::new();
    for (level, interval) in custom_intervals {
        let level: TierLevel = level.parse()?;
        if *interval == 0 {
            return Err(PlanError::ZeroInterval(level.to_string()));
        }
        custom.insert(level, *interval);
    }

    let mut by_level: BTreeMap<TierLevel, Vec<MetricBinding>> = BTreeMap::new();
    for definition in definitions {
        by_level
            .entry(definition.tier_level()?)
            .or_default()
            .push(definition.binding());
    }

    if !has_database {
        let needing: Vec<String> = definitions
            .iter()
            .filter(|def| def.strategy.needs_connection())
            .map(|def| def.id.clone())
            .collect();
        if !needing.is_empty() {
            return Err(PlanError::MissingDatabase(needing));
        }
    }

    if custom.is_empty() {
        if poll_interval == 0 {
            return Err(PlanError::ZeroInterval(DEFAULT_TIER_NAME.to_string()));
        }
        let metrics: Vec<MetricBinding> = by_level.into_values().flatten().collect();
        if metrics.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![TierPlan {
            name: DEFAULT_TIER_NAME.to_string(),
            interval_secs: poll_interval,
            metrics,
        }]);
    }

    let mut plans = Vec::new();
    for level in TierLevel::ALL {
        let Some(metrics) = by_level.remove(&level) else {
            continue;
        };
        let interval_secs = custom.get(&level).copied().unwrap_or(poll_interval);
        if interval_secs == 0 {
            return Err(PlanError::ZeroInterval(level.to_string()));
        }
        plans.push(TierPlan {
            name: level.to_string(),
            interval_secs,
            metrics,
        });
    }
    Ok(plans)
}
