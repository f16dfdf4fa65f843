
use std::sync::Arc;
use std::time::Duration;

use resmgr::error::{MonitorError, SchedulerError};
use resmgr::monitor::Monitor;
use resmgr::scheduler::{JobQueue, JobStatus, ScheduleOutcome, SelectionPolicy};
use test_harness::{mapping, node, spec, RecordingBatchManager, TestScheduler};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_assigns_first_fitting_node_and_rotates_it() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::new());
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    let outcome = bed.scheduler.tick().await.unwrap().unwrap();

    assert_eq!(
        outcome,
        ScheduleOutcome::Dispatched {
            node_id: "N1".to_string()
        }
    );
    assert_eq!(bed.load("N1").await, 2);
    assert_eq!(bed.load("N2").await, 0);
    assert_eq!(bed.queue_order("default").await, ["N2", "N1"]);
    assert_eq!(
        bed.repo.get_job("J1").await.unwrap().job.status,
        JobStatus::Scheduled
    );
    assert!(bed.queue.is_empty().await);
}

#[tokio::test]
async fn test_failed_dispatch_rolls_back_load_and_requeues() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::failing());
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    let outcome = bed.scheduler.tick().await.unwrap().unwrap();

    assert_eq!(
        outcome,
        ScheduleOutcome::DispatchFailed {
            node_id: "N1".to_string()
        }
    );
    assert_eq!(bed.load("N1").await, 0);
    assert_eq!(bed.queue.size().await, 1);
    assert_eq!(bed.queue.queued_jobs().await[0].id(), "J1");
    assert_eq!(bed.repo.job_finished("J1").await, Some(false));
    assert_eq!(
        bed.repo.get_job("J1").await.unwrap().job.status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn test_requeued_job_is_dispatched_once_node_recovers() {
    let batch = RecordingBatchManager::failing();
    let bed = TestScheduler::two_nodes(batch.clone());
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    bed.scheduler.tick().await;
    bed.scheduler.tick().await;
    assert_eq!(bed.queue.size().await, 1);
    assert!(batch.dispatched().await.is_empty());

    batch.set_failing(false);
    bed.scheduler.tick().await;

    assert!(bed.queue.is_empty().await);
    assert_eq!(batch.dispatched().await.len(), 1);
    // Both failed attempts rotated a node, so N1 is back at the head.
    assert_eq!(batch.dispatched_nodes().await, ["N1"]);
    assert_eq!(bed.load("N1").await, 2);
    assert_eq!(bed.load("N2").await, 0);
}

#[tokio::test]
async fn test_lru_rotation_alternates_nodes() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::new(
        vec![node("N1", 10), node("N2", 10), node("N3", 10)],
        mapping(&[("default", &["N1", "N2", "N3"])]),
        batch.clone(),
    );

    for i in 0..4 {
        bed.queue
            .add_job(spec(&format!("J{}", i), "default", 1))
            .await
            .unwrap();
    }
    for _ in 0..4 {
        bed.scheduler.tick().await;
    }

    assert_eq!(batch.dispatched_nodes().await, ["N1", "N2", "N3", "N1"]);
    assert_eq!(bed.queue_order("default").await, ["N2", "N3", "N1"]);
}

#[tokio::test]
async fn test_full_node_is_skipped() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::new(
        vec![node("N1", 2), node("N2", 4)],
        mapping(&[("default", &["N1", "N2"])]),
        batch.clone(),
    );
    bed.monitor.assign_load(&node("N1", 2), 1).await.unwrap();
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    bed.scheduler.tick().await;

    assert_eq!(batch.dispatched_nodes().await, ["N2"]);
    assert_eq!(bed.load("N1").await, 1);
    assert_eq!(bed.load("N2").await, 2);
}

#[tokio::test]
async fn test_no_available_node_requeues_without_touching_load() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::new());
    bed.queue.add_job(spec("big", "default", 5)).await.unwrap();

    let outcome = bed.scheduler.tick().await.unwrap().unwrap();

    assert_eq!(outcome, ScheduleOutcome::NoNodeAvailable);
    assert_eq!(bed.queue.size().await, 1);
    assert_eq!(bed.load("N1").await, 0);
    assert_eq!(bed.load("N2").await, 0);
    assert_eq!(bed.queue_order("default").await, ["N1", "N2"]);
}

#[tokio::test]
async fn test_committed_load_policy_prefers_busy_nodes() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::two_nodes(batch.clone())
        .map_scheduler(|s| s.with_policy(SelectionPolicy::CommittedLoad));
    bed.monitor.assign_load(&node("N2", 4), 2).await.unwrap();
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    bed.scheduler.tick().await;

    assert_eq!(batch.dispatched_nodes().await, ["N2"]);
    assert_eq!(bed.load("N1").await, 0);
    assert_eq!(bed.load("N2").await, 4);
}

#[tokio::test]
async fn test_committed_load_policy_rejects_idle_nodes() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::new())
        .map_scheduler(|s| s.with_policy(SelectionPolicy::CommittedLoad));
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    let outcome = bed.scheduler.tick().await.unwrap().unwrap();

    assert_eq!(outcome, ScheduleOutcome::NoNodeAvailable);
    assert_eq!(bed.queue.size().await, 1);
}

#[tokio::test]
async fn test_unknown_queue_is_an_error_and_job_is_kept() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::new());
    bed.queue.add_job(spec("J1", "nowhere", 1)).await.unwrap();

    let result = bed.scheduler.tick().await.unwrap();

    assert!(matches!(result, Err(SchedulerError::UnknownQueue(q)) if q == "nowhere"));
    assert_eq!(bed.queue.size().await, 1);
}

#[tokio::test]
async fn test_node_missing_from_monitor_is_skipped() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::new(
        vec![node("N2", 4)],
        mapping(&[("default", &["ghost", "N2"])]),
        batch.clone(),
    );
    bed.queue.add_job(spec("J1", "default", 1)).await.unwrap();

    let candidate = bed
        .scheduler
        .node_available(&spec("J1", "default", 1))
        .await
        .unwrap();
    assert_eq!(candidate.map(|n| n.id).as_deref(), Some("N2"));

    bed.scheduler.tick().await;

    assert_eq!(batch.dispatched_nodes().await, ["N2"]);
}

#[tokio::test]
async fn test_assign_failure_surfaces_monitor_error_and_requeues() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::new(
        vec![node("N1", 4)],
        mapping(&[("default", &["N1"])]),
        batch.clone(),
    )
    .map_scheduler(|s| s.with_policy(SelectionPolicy::CommittedLoad));
    // Committed-load accepts N1 (2 <= 3) but the monitor refuses to exceed capacity.
    bed.monitor.assign_load(&node("N1", 4), 3).await.unwrap();
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    let result = bed.scheduler.tick().await.unwrap();

    assert!(matches!(
        result,
        Err(SchedulerError::Monitor(MonitorError::InsufficientCapacity { .. }))
    ));
    assert_eq!(bed.load("N1").await, 3);
    assert_eq!(bed.queue.size().await, 1);
    assert_eq!(bed.queue_order("default").await, ["N1"]);
    assert!(batch.dispatched().await.is_empty());
}

#[tokio::test]
async fn test_dispatch_timeout_counts_as_failure() {
    let batch = RecordingBatchManager::slow(Duration::from_millis(500));
    let bed = TestScheduler::two_nodes(batch.clone())
        .map_scheduler(|s| s.with_dispatch_timeout(Some(Duration::from_millis(20))));
    bed.queue.add_job(spec("J1", "default", 2)).await.unwrap();

    let outcome = bed.scheduler.tick().await.unwrap().unwrap();

    assert_eq!(
        outcome,
        ScheduleOutcome::DispatchFailed {
            node_id: "N1".to_string()
        }
    );
    assert_eq!(bed.load("N1").await, 0);
    assert_eq!(bed.queue.size().await, 1);
}

#[tokio::test]
async fn test_concurrent_schedules_never_overcommit() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::new(
        vec![node("N1", 4)],
        mapping(&[("default", &["N1"])]),
        batch.clone(),
    );
    let scheduler = Arc::new(bed.scheduler);

    let mut handles = Vec::new();
    for i in 0..8 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler
                .schedule(spec(&format!("J{}", i), "default", 1))
                .await
                .unwrap()
        }));
    }
    let outcomes = futures::future::join_all(handles).await;

    let dispatched = outcomes
        .into_iter()
        .map(|o| o.unwrap())
        .filter(|o| matches!(o, ScheduleOutcome::Dispatched { .. }))
        .count();
    assert_eq!(dispatched, 4);
    assert_eq!(bed.monitor.loads().await["N1"], 4);
    assert_eq!(batch.dispatched().await.len(), 4);
}

#[tokio::test]
async fn test_run_loop_drains_queue_until_shutdown() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::two_nodes(batch.clone());
    for i in 0..3 {
        bed.queue
            .add_job(spec(&format!("J{}", i), "default", 1))
            .await
            .unwrap();
    }
    let scheduler = Arc::new(bed.scheduler);
    let shutdown = CancellationToken::new();

    let handle = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    test_harness::assert_eventually(
        || async { batch.dispatched().await.len() == 3 },
        Duration::from_secs(2),
        "scheduler should dispatch all queued jobs",
    )
    .await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler should stop on shutdown")
        .unwrap();
    assert!(bed.queue.is_empty().await);
}

#[tokio::test]
async fn test_tick_on_empty_queue_does_nothing() {
    let bed = TestScheduler::two_nodes(RecordingBatchManager::new());
    assert!(bed.scheduler.tick().await.is_none());
}

#[tokio::test]
async fn test_job_missing_from_repository_is_skipped() {
    let batch = RecordingBatchManager::new();
    let bed = TestScheduler::two_nodes(batch.clone());
    bed.queue.add_job(spec("J1", "default", 1)).await.unwrap();
    bed.queue.add_job(spec("J2", "default", 1)).await.unwrap();
    bed.repo.remove_job("J1").await;

    let first = bed.scheduler.tick().await.unwrap();
    assert!(matches!(first, Err(SchedulerError::JobQueue(_))));

    let second = bed.scheduler.tick().await.unwrap().unwrap();
    assert_eq!(
        second,
        ScheduleOutcome::Dispatched {
            node_id: "N1".to_string()
        }
    );
    assert_eq!(batch.dispatched().await, [("J2".to_string(), "N1".to_string())]);
    assert!(bed.queue.is_empty().await);
}
