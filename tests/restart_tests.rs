
use std::time::Duration;

use flotilla::fleet::restart::FleetEvent;
use flotilla::fleet::task::TaskState;
use flotilla::server::RestartScope;
use test_harness::{definition, test_restart_config, wait_until, TestFleet};

async fn scale_and_launch(fleet: &TestFleet, type_name: &str, count: usize) -> Vec<String> {
    fleet.handle.scale(type_name, count as i64).await.unwrap();
    let enqueued = wait_until(Duration::from_secs(2), || async {
        fleet.pending_count().await == count
    })
    .await;
    assert!(enqueued, "scale-up did not enqueue {} instances", count);

    let mut task_ids = Vec::new();
    for _ in 0..count {
        task_ids.push(fleet.launch_next_pending().await.unwrap());
    }
    task_ids
}

#[tokio::test]
async fn restart_kills_original_only_after_clone_confirms() {
    let mut fleet = TestFleet::start(vec![definition("web", 0, true)]).await;
    let original = scale_and_launch(&fleet, "web", 1).await.remove(0);

    fleet.handle.restart_task(&original).await.unwrap();

    // The replacement clone lands in pending under the same fleet name.
    let cloned = wait_until(Duration::from_secs(2), || async {
        fleet.pending_count().await == 1
    })
    .await;
    assert!(cloned, "replacement clone was not enqueued");
    {
        let registry = fleet.registry.read().await;
        let clone = &registry.pending()[0];
        assert_eq!(clone.name.to_string(), "web-1");
        assert!(!clone.is_submitted);
        assert!(clone.runtime.is_none());
        // The original is marked restarting under the same mutation.
        let orig = registry.find_launched_by_task_id(&original).unwrap();
        assert!(orig.runtime.as_ref().unwrap().restarting);
    }

    // Mid-restart instances drop out of running counts immediately.
    let stats = fleet.handle.type_stats().await.unwrap();
    assert_eq!(stats[0].running_instances, 0);

    // Launch-before-kill: nothing dies until the clone confirms.
    fleet.expect_no_kill(Duration::from_millis(300)).await;

    fleet.launch_next_pending().await.unwrap();
    let kill = fleet.expect_kill(Duration::from_secs(2)).await;
    assert_eq!(kill.task_id, original);

    match fleet.expect_event(Duration::from_secs(2)).await {
        FleetEvent::TaskRestarted { name } => assert_eq!(name.to_string(), "web-1"),
        other => panic!("expected TaskRestarted, got {:?}", other),
    }
}

#[tokio::test]
async fn restart_with_healthcheck_requires_healthy_before_kill() {
    let mut config = test_restart_config();
    config.use_healthcheck = true;
    let mut fleet = TestFleet::start_with(vec![definition("web", 0, true)], config).await;
    let original = scale_and_launch(&fleet, "web", 1).await.remove(0);

    fleet.handle.restart_task(&original).await.unwrap();
    let cloned = wait_until(Duration::from_secs(2), || async {
        fleet.pending_count().await == 1
    })
    .await;
    assert!(cloned, "replacement clone was not enqueued");

    // Running but with no health report yet: not confirmation enough.
    let clone_task = fleet.launch_next_pending_with(None).await.unwrap();
    fleet.expect_no_kill(Duration::from_millis(500)).await;

    fleet
        .send_status(&clone_task, TaskState::Running, Some(true))
        .await;
    let kill = fleet.expect_kill(Duration::from_secs(2)).await;
    assert_eq!(kill.task_id, original);
}

#[tokio::test]
async fn restart_of_unknown_task_changes_nothing() {
    let mut fleet = TestFleet::start(vec![definition("web", 0, true)]).await;
    let _original = scale_and_launch(&fleet, "web", 1).await;

    fleet.handle.restart_task("no-such-task").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fleet.pending_count().await, 0);
    assert_eq!(fleet.launched_count().await, 1);
    fleet.expect_no_kill(Duration::from_millis(200)).await;
    let quiet = tokio::time::timeout(Duration::from_millis(200), fleet.events.recv()).await;
    assert!(quiet.is_err(), "no event should fire for a missing target");
}

#[tokio::test]
async fn restart_timeout_preserves_the_original() {
    let mut config = test_restart_config();
    config.timeout = Duration::from_millis(300);
    let mut fleet = TestFleet::start_with(vec![definition("web", 0, true)], config).await;
    let original = scale_and_launch(&fleet, "web", 1).await.remove(0);

    fleet.handle.restart_task(&original).await.unwrap();

    // The clone is never confirmed; the bounded wait elapses.
    match fleet.expect_event(Duration::from_secs(2)).await {
        FleetEvent::RestartAbandoned { name } => assert_eq!(name.to_string(), "web-1"),
        other => panic!("expected RestartAbandoned, got {:?}", other),
    }

    fleet.expect_no_kill(Duration::from_millis(200)).await;
    let registry = fleet.registry.read().await;
    assert!(
        registry.find_launched_by_task_id(&original).is_some(),
        "original must stay launched after an abandoned restart"
    );
}

#[tokio::test]
async fn rolling_restart_goes_last_to_first_and_signals_the_end() {
    let mut fleet = TestFleet::start(vec![definition("web", 0, true)]).await;
    let originals = scale_and_launch(&fleet, "web", 3).await;

    fleet
        .handle
        .rolling_restart(RestartScope::Fleet)
        .await
        .unwrap();

    // Strict LIFO over the snapshot: web-3, then web-2, then web-1.
    for expected in originals.iter().rev() {
        let cloned = wait_until(Duration::from_secs(2), || async {
            fleet.pending_count().await == 1
        })
        .await;
        assert!(cloned, "next replacement clone was not enqueued");
        fleet.launch_next_pending().await.unwrap();
        let kill = fleet.expect_kill(Duration::from_secs(2)).await;
        assert_eq!(&kill.task_id, expected);
    }

    assert_eq!(
        fleet.expect_event(Duration::from_secs(2)).await,
        FleetEvent::RollingRestartEnded
    );
    let quiet = tokio::time::timeout(Duration::from_millis(200), fleet.events.recv()).await;
    assert!(quiet.is_err(), "exactly one ended signal fires");
}

#[tokio::test]
async fn rolling_restart_of_nothing_ends_immediately() {
    let mut fleet = TestFleet::start(vec![definition("web", 0, true)]).await;

    fleet
        .handle
        .rolling_restart(RestartScope::Fleet)
        .await
        .unwrap();

    assert_eq!(
        fleet.expect_event(Duration::from_secs(2)).await,
        FleetEvent::RollingRestartEnded
    );
    fleet.expect_no_kill(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn rolling_restart_scoped_to_a_type_leaves_others_alone() {
    let mut fleet =
        TestFleet::start(vec![definition("web", 0, true), definition("db", 0, true)]).await;
    let web_task = scale_and_launch(&fleet, "web", 1).await.remove(0);
    let db_task = scale_and_launch(&fleet, "db", 1).await.remove(0);

    fleet
        .handle
        .rolling_restart(RestartScope::Type("web".to_string()))
        .await
        .unwrap();

    let cloned = wait_until(Duration::from_secs(2), || async {
        fleet.pending_count().await == 1
    })
    .await;
    assert!(cloned);
    {
        let registry = fleet.registry.read().await;
        assert_eq!(registry.pending()[0].type_name(), "web");
    }
    fleet.launch_next_pending().await.unwrap();
    let kill = fleet.expect_kill(Duration::from_secs(2)).await;
    assert_eq!(kill.task_id, web_task);

    assert_eq!(
        fleet.expect_event(Duration::from_secs(2)).await,
        FleetEvent::RollingRestartEnded
    );

    let registry = fleet.registry.read().await;
    let db = registry.find_launched_by_task_id(&db_task).unwrap();
    assert!(!db.runtime.as_ref().unwrap().restarting);
}

#[tokio::test]
async fn rolling_restart_stalls_when_one_restart_times_out() {
    let mut config = test_restart_config();
    config.timeout = Duration::from_millis(300);
    let mut fleet = TestFleet::start_with(vec![definition("web", 0, true)], config).await;
    let _originals = scale_and_launch(&fleet, "web", 2).await;

    fleet
        .handle
        .rolling_restart(RestartScope::Fleet)
        .await
        .unwrap();

    // The first (last-numbered) restart is never confirmed.
    match fleet.expect_event(Duration::from_secs(2)).await {
        FleetEvent::RestartAbandoned { name } => assert_eq!(name.to_string(), "web-2"),
        other => panic!("expected RestartAbandoned, got {:?}", other),
    }

    // The chain stalls: no kill, no further clone, and no ended signal.
    fleet.expect_no_kill(Duration::from_millis(300)).await;
    assert_eq!(fleet.pending_count().await, 1, "only the stuck clone remains");
    let quiet = tokio::time::timeout(Duration::from_millis(300), fleet.events.recv()).await;
    assert!(quiet.is_err(), "the rollout must not continue past a stall");
}
