//! End-to-end tier scheduling: independent timers and per-metric failure
//! containment.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use usage_metrics::{MetricSink, MetricValue};
use usage_poller::{
    plan_tiers, register_definitions, CollectError, CollectResult, CollectionStrategy,
    CollectionTier, CommandExecutor, CommandStrategy, MetricBinding, MetricDefinition,
    MetricDispatcher, QueryStrategy, SqliteConnectionProvider, TierLevel, TierScheduler,
};

/// Counts invocations per program and answers with a fixed value
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<HashMap<String, u64>>,
    slow_program: Option<(String, Duration)>,
}

impl RecordingExecutor {
    fn calls(&self, program: &str) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(program)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, program: &str, _args: &[String]) -> CollectResult<String> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(program.to_string())
            .or_default() += 1;

        if let Some((slow, work)) = &self.slow_program {
            if slow == program {
                tokio::time::sleep(*work).await;
            }
        }

        match program {
            "garbage.sh" => Ok("ERROR: instance not reachable\n".to_string()),
            "down.sh" => Err(CollectError::TransientIo("connection refused".to_string())),
            _ => Ok("42\n".to_string()),
        }
    }
}

fn probe(id: &str, level: TierLevel) -> MetricDefinition {
    MetricDefinition::new(
        id,
        level,
        CollectionStrategy::Command(CommandStrategy::new(format!("{}.sh", id))),
    )
}

fn schedule(
    executor: Arc<RecordingExecutor>,
    sink: Arc<MetricSink>,
    definitions: &[MetricDefinition],
    custom: &BTreeMap<String, u64>,
) -> TierScheduler {
    let dispatcher = Arc::new(MetricDispatcher::new());
    register_definitions(&dispatcher, definitions).expect("register");

    let mut scheduler = TierScheduler::new();
    for plan in plan_tiers(30, custom, definitions, false).expect("plan") {
        let tier = CollectionTier::new(
            plan.name.clone(),
            plan.metrics,
            Arc::clone(&dispatcher),
            executor.clone(),
            Arc::clone(&sink),
        );
        scheduler
            .register_tier(&plan.name, plan.interval_secs, Arc::new(tier))
            .expect("register tier");
    }
    scheduler
}

#[tokio::test(start_paused = true)]
async fn tiers_tick_independently_at_their_intervals() {
    let executor = Arc::new(RecordingExecutor::default());
    let sink = Arc::new(MetricSink::new());
    let definitions = vec![
        probe("short_probe", TierLevel::Short),
        probe("medium_probe", TierLevel::Medium),
        probe("long_probe", TierLevel::Long),
    ];
    let custom = BTreeMap::from([
        ("short".to_string(), 5),
        ("medium".to_string(), 10),
        ("long".to_string(), 15),
    ]);

    let mut scheduler = schedule(executor.clone(), Arc::clone(&sink), &definitions, &custom);
    assert_eq!(scheduler.tier_names(), vec!["short", "medium", "long"]);

    scheduler.start().expect("start");
    tokio::time::sleep(Duration::from_secs(30)).await;
    scheduler.stop().await;

    assert_eq!(executor.calls("short_probe.sh"), 6);
    assert_eq!(executor.calls("medium_probe.sh"), 3);
    assert_eq!(executor.calls("long_probe.sh"), 2);
    assert_eq!(sink.get("long_probe"), Some(MetricValue::Scalar(42.0)));
}

#[tokio::test(start_paused = true)]
async fn slow_tier_does_not_delay_other_tiers() {
    let executor = Arc::new(RecordingExecutor {
        slow_program: Some(("long_probe.sh".to_string(), Duration::from_secs(20))),
        ..RecordingExecutor::default()
    });
    let definitions = vec![
        probe("short_probe", TierLevel::Short),
        probe("long_probe", TierLevel::Long),
    ];
    let custom = BTreeMap::from([("short".to_string(), 5), ("long".to_string(), 15)]);

    let mut scheduler = schedule(
        executor.clone(),
        Arc::new(MetricSink::new()),
        &definitions,
        &custom,
    );
    scheduler.start().expect("start");
    tokio::time::sleep(Duration::from_secs(30)).await;
    scheduler.stop().await;

    assert_eq!(executor.calls("short_probe.sh"), 6);
    // Started at 1, busy until 21, next start at 36
    assert_eq!(executor.calls("long_probe.sh"), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_metric_does_not_stop_the_tier() {
    let executor = Arc::new(RecordingExecutor::default());
    let sink = Arc::new(MetricSink::new());
    sink.record("garbage", MetricValue::Scalar(3.0));

    let definitions = vec![
        probe("garbage", TierLevel::Medium),
        probe("down", TierLevel::Medium),
        probe("sessions", TierLevel::Medium),
    ];
    let custom = BTreeMap::from([("medium".to_string(), 5)]);
    let mut scheduler = schedule(executor.clone(), Arc::clone(&sink), &definitions, &custom);
    let stats = scheduler.stats("medium").expect("stats");

    scheduler.start().expect("start");
    tokio::time::sleep(Duration::from_secs(7)).await;
    scheduler.stop().await;

    assert_eq!(stats.runs(), 2);
    assert_eq!(stats.failures(), 0);
    assert_eq!(executor.calls("garbage.sh"), 2);
    assert_eq!(executor.calls("sessions.sh"), 2);
    assert_eq!(sink.get("garbage"), Some(MetricValue::Scalar(3.0)));
    assert_eq!(sink.get("down"), None);
    assert_eq!(sink.get("sessions"), Some(MetricValue::Scalar(42.0)));
}

#[tokio::test]
async fn mixed_query_and_command_tier_against_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("monitor.db");
    {
        let connection = Connection::open(&db_path).expect("create db");
        connection
            .execute_batch(
                "CREATE TABLE sessions (id INTEGER PRIMARY KEY, state TEXT);
                 INSERT INTO sessions (state) VALUES ('active'), ('active'), ('idle');",
            )
            .expect("seed db");
    }

    let dispatcher = Arc::new(MetricDispatcher::new());
    let definitions = vec![
        probe("garbage", TierLevel::Short),
        MetricDefinition::new(
            "db.session.count",
            TierLevel::Short,
            CollectionStrategy::Query(QueryStrategy::scalar("SELECT COUNT(*) FROM sessions")),
        ),
        MetricDefinition::new(
            "db.session.active",
            TierLevel::Short,
            CollectionStrategy::Query(
                QueryStrategy::scalar("SELECT COUNT(*) FROM sessions WHERE state = ?1")
                    .with_params(vec!["active".to_string()]),
            ),
        ),
    ];
    register_definitions(&dispatcher, &definitions).expect("register");

    let sink = Arc::new(MetricSink::new());
    sink.record("garbage", MetricValue::Scalar(5.0));
    let tier = CollectionTier::new(
        "short",
        definitions
            .iter()
            .map(|def| MetricBinding::direct(def.id.clone()))
            .collect(),
        dispatcher,
        Arc::new(RecordingExecutor::default()),
        Arc::clone(&sink),
    )
    .with_connections(Arc::new(SqliteConnectionProvider::new(&db_path)))
    .with_status_metric("db.status");

    let report = tier.collect_once().await.expect("first tick");
    assert_eq!(report.collected, vec!["db.session.count", "db.session.active"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(sink.get("db.status"), Some(MetricValue::Scalar(1.0)));
    assert_eq!(sink.get("db.session.count"), Some(MetricValue::Scalar(3.0)));
    assert_eq!(sink.get("db.session.active"), Some(MetricValue::Scalar(2.0)));
    assert_eq!(sink.get("garbage"), Some(MetricValue::Scalar(5.0)));

    {
        let connection = Connection::open(&db_path).expect("reopen db");
        connection
            .execute("INSERT INTO sessions (state) VALUES ('active')", [])
            .expect("insert");
    }

    tier.collect_once().await.expect("second tick");
    assert_eq!(sink.get("db.session.count"), Some(MetricValue::Scalar(4.0)));
    assert_eq!(sink.get("db.session.active"), Some(MetricValue::Scalar(3.0)));
    assert_eq!(sink.get("garbage"), Some(MetricValue::Scalar(5.0)));
}

#[tokio::test]
async fn unreachable_database_fails_the_whole_tick() {
    let dir = tempfile::tempdir().expect("temp dir");
    let dispatcher = Arc::new(MetricDispatcher::new());
    dispatcher
        .register(
            "db.session.count",
            CollectionStrategy::Query(QueryStrategy::scalar("SELECT 1")),
        )
        .expect("register");

    let sink = Arc::new(MetricSink::new());
    let tier = CollectionTier::new(
        "short",
        vec![MetricBinding::direct("db.session.count")],
        dispatcher,
        Arc::new(RecordingExecutor::default()),
        Arc::clone(&sink),
    )
    .with_connections(Arc::new(SqliteConnectionProvider::new(
        dir.path().join("missing.db"),
    )))
    .with_status_metric("db.status");

    assert!(tier.collect_once().await.is_err());
    assert_eq!(sink.get("db.status"), None);
}
