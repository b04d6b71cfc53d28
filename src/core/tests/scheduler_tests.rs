//! Integration tests for the worker-pool scheduler.
//!
//! Tests cover:
//! - Dispatch order across ranks and within a rank
//! - Jobs submitted while workers are running
//! - Aging interplay with urgent work
//! - Multi-worker execution and shutdown
//! - Awaiting job results alongside a running pool

use jobrank_core::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn urgent() -> Priority {
    Priority::new("Urgent", 0)
}

fn necessary() -> Priority {
    Priority::new("Necessary", 10)
}

fn background() -> Priority {
    Priority::new("Background", 100)
}

fn scheduler_with(levels: &[Priority]) -> Scheduler {
    let scheduler = Scheduler::new();
    for level in levels {
        scheduler.add_priority(level.clone()).unwrap();
    }
    scheduler
}

fn sleeper(label: &str, work: Duration) -> Arc<Job> {
    Job::labeled(label, move |_| async move {
        tokio::time::sleep(work).await;
        JobResult::empty()
    })
}

/// Records `(label, original rank, dequeue rank, promotions)` per completion.
fn record(scheduler: &Scheduler) -> Arc<Mutex<Vec<(String, i64, i64, u32)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    scheduler
        .set_completion_hook(move |done| {
            sink.lock().push((
                done.job.label().unwrap_or_default().to_string(),
                done.original_priority.rank(),
                done.priority.rank(),
                done.promotions,
            ));
        })
        .unwrap();
    seen
}

fn labels(seen: &Mutex<Vec<(String, i64, i64, u32)>>) -> Vec<String> {
    seen.lock().iter().map(|(label, ..)| label.clone()).collect()
}

// ============================================================================
// Dispatch Order Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rank_order_before_run() {
    let scheduler = scheduler_with(&[urgent(), necessary(), background()]);
    scheduler.schedule(&background(), sleeper("background", Duration::ZERO)).unwrap();
    scheduler.schedule(&necessary(), sleeper("necessary", Duration::ZERO)).unwrap();
    scheduler.schedule(&urgent(), sleeper("urgent", Duration::ZERO)).unwrap();
    let seen = record(&scheduler);

    let token = CancelToken::with_timeout(Duration::from_millis(500));
    let err = scheduler.run_one(&token).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::Timeout);
    assert_eq!(labels(&seen), ["urgent", "necessary", "background"]);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_within_rank() {
    let scheduler = scheduler_with(&[urgent(), background()]);
    for i in 0..5 {
        scheduler
            .schedule(&background(), sleeper(&format!("b{}", i), Duration::ZERO))
            .unwrap();
    }
    let seen = record(&scheduler);

    let token = CancelToken::with_timeout(Duration::from_millis(100));
    let _ = scheduler.run_one(&token).await;

    assert_eq!(labels(&seen), ["b0", "b1", "b2", "b3", "b4"]);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_added_after_run() {
    let scheduler = scheduler_with(&[urgent(), necessary(), background()]);
    let seen = record(&scheduler);
    let work = Duration::from_millis(100);

    let producer = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            scheduler.schedule(&background(), sleeper("background", work)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler.schedule(&necessary(), sleeper("necessary", work)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler.schedule(&urgent(), sleeper("urgent", work)).unwrap();
        })
    };

    let token = CancelToken::with_timeout(Duration::from_secs(1));
    let err = scheduler.run_one(&token).await.unwrap_err();
    producer.await.unwrap();

    assert_eq!(err.code(), ErrorCode::Timeout);
    // Background started before the others arrived.
    assert_eq!(labels(&seen), ["background", "urgent", "necessary"]);
}

#[tokio::test]
async fn test_schedule_unknown_priority() {
    let scheduler = scheduler_with(&[urgent()]);
    let err = scheduler
        .schedule(&background(), sleeper("lost", Duration::ZERO))
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::UnknownPriority);
    assert!(err.is_recoverable());
    assert_eq!(scheduler.pending(), 0);
}

// ============================================================================
// Aging Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_aged_job_does_not_overtake_urgent() {
    let scheduler = scheduler_with(&[
        urgent(),
        necessary().with_aging(Duration::from_secs(1)),
        background().with_no_aging(),
    ]);
    let seen = record(&scheduler);

    scheduler.schedule(&urgent(), sleeper("blocker", Duration::from_secs(3))).unwrap();
    scheduler.schedule(&necessary(), sleeper("necessary", Duration::ZERO)).unwrap();
    scheduler.schedule(&background(), sleeper("background", Duration::ZERO)).unwrap();

    let producer = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            scheduler.schedule(&urgent(), sleeper("urgent", Duration::ZERO)).unwrap();
        })
    };

    let token = CancelToken::with_timeout(Duration::from_secs(5));
    let _ = scheduler.run_one(&token).await;
    producer.await.unwrap();

    let seen = seen.lock().clone();
    let order: Vec<&str> = seen.iter().map(|(label, ..)| label.as_str()).collect();
    assert_eq!(order, ["blocker", "urgent", "necessary", "background"]);

    let (_, original, picked, promotions) = &seen[2];
    assert_eq!((*original, *picked, *promotions), (10, 0, 1));

    let (_, original, picked, promotions) = &seen[3];
    assert_eq!((*original, *picked, *promotions), (100, 100, 0));
}

#[tokio::test(start_paused = true)]
async fn test_default_aging_promotes_step_by_step() {
    let scheduler = scheduler_with(&[urgent(), necessary(), background()]);
    scheduler.set_default_job_aging(Duration::from_millis(100)).unwrap();
    scheduler.refresh_every(Duration::from_millis(100)).unwrap();
    let seen = record(&scheduler);

    scheduler.schedule(&urgent(), sleeper("blocker", Duration::from_millis(450))).unwrap();
    scheduler.schedule(&background(), sleeper("background", Duration::ZERO)).unwrap();

    let token = CancelToken::with_timeout(Duration::from_secs(1));
    let _ = scheduler.run_one(&token).await;

    let seen = seen.lock().clone();
    let (label, original, picked, promotions) = &seen[1];
    assert_eq!(label, "background");
    assert_eq!((*original, *picked), (100, 0));
    assert_eq!(*promotions, 2);
}

// ============================================================================
// Worker Pool Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_job_runs_once_across_workers() {
    const JOBS: usize = 50;

    let scheduler = scheduler_with(&[urgent(), necessary(), background()]);
    let executions = Arc::new(AtomicUsize::new(0));
    let hooks = Arc::new(AtomicUsize::new(0));
    let token = CancelToken::with_timeout(Duration::from_secs(30));

    {
        let hooks = hooks.clone();
        let token = token.clone();
        scheduler
            .set_completion_hook(move |_| {
                if hooks.fetch_add(1, Ordering::SeqCst) + 1 == JOBS {
                    token.cancel();
                }
            })
            .unwrap();
    }

    let levels = [urgent(), necessary(), background()];
    let mut jobs = Vec::new();
    for i in 0..JOBS {
        let executions = executions.clone();
        let job = Job::new(move |_| async move {
            executions.fetch_add(1, Ordering::SeqCst);
            JobResult::value(i)
        });
        scheduler.schedule(&levels[i % levels.len()], job.clone()).unwrap();
        jobs.push(job);
    }

    let err = scheduler.run(&token, 4).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);

    assert_eq!(executions.load(Ordering::SeqCst), JOBS);
    assert_eq!(hooks.load(Ordering::SeqCst), JOBS);
    for (i, job) in jobs.iter().enumerate() {
        let result = job.get_result().unwrap();
        assert_eq!(result.get_value::<usize>().unwrap(), i);
    }

    let stats = scheduler.stats();
    assert_eq!(stats.executed, JOBS as u64);
    assert_eq!(stats.queue.pending, 0);
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_timeout() {
    let scheduler = scheduler_with(&[urgent()]);
    let token = CancelToken::with_timeout(Duration::from_millis(200));
    let err = scheduler.run(&token, 2).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(err.is_interruption());
}

#[tokio::test(start_paused = true)]
async fn test_wait_result_while_pool_runs() {
    let scheduler = scheduler_with(&[urgent(), necessary(), background()]);
    let background_job = Job::new(|_| async { JobResult::value(String::from("background")) });

    let producer = {
        let scheduler = scheduler.clone();
        let job = background_job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler.schedule(&background(), job).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler
                .schedule(&urgent(), Job::new(|_| async { JobResult::empty() }))
                .unwrap();
        })
    };

    let token = CancelToken::with_timeout(Duration::from_secs(1));
    let pool = {
        let scheduler = scheduler.clone();
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(&token, 2).await })
    };

    let result = background_job.wait_result(&token).await.unwrap();
    assert_eq!(result.get_value::<String>().unwrap(), "background");

    producer.await.unwrap();
    let err = pool.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
}

#[tokio::test]
async fn test_hook_cannot_change_after_start() {
    let scheduler = scheduler_with(&[urgent()]);
    scheduler.set_completion_hook(|_| {}).unwrap();
    // Replacing before start is fine.
    scheduler.set_completion_hook(|_| {}).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let _ = scheduler.run(&token, 1).await;

    let err = scheduler.set_completion_hook(|_| {}).unwrap_err();
    assert_eq!(err.code(), ErrorCode::HookAfterStart);
    assert!(err.is_configuration());
}
