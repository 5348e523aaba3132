use std::time::Duration;

use anyhow::Result;
use offload::{Operation, PoolError, TaskError, WorkerPool};
use serde_json::json;

mod test_helpers;
use test_helpers::{echo, wait, wait_then_panic, within, GateScript, RecordingReporter};

#[tokio::test]
async fn test_terminate_rejects_queued_and_waits_for_running() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(1).catalog(&script.catalog("gates")).build()?;

    let a = pool.submit(wait("a", 1), Vec::new());
    script.started().await;
    let b = pool.submit(echo(2), Vec::new());

    let terminating = tokio::spawn({
        let pool = pool.clone();
        async move { pool.terminate().await }
    });

    let b = within(b).await;
    assert_eq!(b, Err(TaskError::Terminated));
    assert_eq!(b.unwrap_err().to_string(), "pool terminated");
    assert!(pool.is_shutting_down());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!terminating.is_finished(), "terminate returned while a task was still running");

    // The running task settles on its own.
    script.open("a");
    assert_eq!(within(a).await?["value"], json!(1));
    within(terminating).await??;

    let status = pool.status().await;
    assert_eq!(status.completed_tasks, 1);
    assert_eq!(status.failed_tasks, 1);
    Ok(())
}

#[tokio::test]
async fn test_crash_during_shutdown_is_not_replaced() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(1).catalog(&script.catalog("gates")).build()?;

    let doomed = pool.submit(wait_then_panic("boom"), Vec::new());
    script.started().await;
    let queued = pool.submit(echo(2), Vec::new());

    let terminating = tokio::spawn({
        let pool = pool.clone();
        async move { pool.terminate().await }
    });
    assert_eq!(within(queued).await, Err(TaskError::Terminated));

    script.open("boom");
    assert!(matches!(within(doomed).await, Err(TaskError::UnitFault(_))));
    within(terminating).await??;

    let status = pool.status().await;
    assert_eq!(status.replaced_units, 0);
    assert_eq!(status.live_units, 0);
    assert_eq!(script.init_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pool_is_unusable_after_terminate() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(2).catalog(&script.catalog("gates")).build()?;
    within(pool.initialize()).await?;
    within(pool.terminate()).await?;

    let status = pool.status().await;
    assert!(status.shutting_down);
    assert_eq!(status.live_units, 0);

    assert_eq!(within(pool.submit(echo(1), Vec::new())).await, Err(TaskError::Terminated));
    assert_eq!(within(pool.initialize()).await, Err(PoolError::Terminated));

    // Terminating again is a no-op.
    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_terminate_before_initialize() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(4).catalog(&script.catalog("gates")).build()?;

    within(pool.terminate()).await?;
    assert_eq!(script.init_count(), 0);
    assert_eq!(pool.live_units(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_terminate_calls_share_outcome() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(2).catalog(&script.catalog("gates")).build()?;
    within(pool.initialize()).await?;

    let (first, second) = within(async { tokio::join!(pool.terminate(), pool.terminate()) }).await;
    first?;
    second?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_timeout_abandons_running_tasks() -> Result<()> {
    let script = GateScript::new();
    let reporter = RecordingReporter::new();
    let pool = WorkerPool::builder("gates")
        .pool_size(1)
        .shutdown_timeout(Duration::from_millis(100))
        .catalog(&script.catalog("gates"))
        .error_reporter(reporter.clone())
        .build()?;

    let stuck = pool.submit(wait("stuck", 1), Vec::new());
    script.started().await;

    let result = within(pool.terminate()).await;
    assert_eq!(result, Err(PoolError::ShutdownTimeout { remaining: 1 }));
    assert_eq!(within(stuck).await, Err(TaskError::Terminated));
    assert_eq!(reporter.count(Operation::Terminate), 1);

    // Let the detached thread finish.
    script.open("stuck");
    Ok(())
}

#[tokio::test]
async fn test_dropping_last_handle_terminates_pool() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(1).catalog(&script.catalog("gates")).build()?;

    let running = pool.submit(wait("drop", 1), Vec::new());
    script.started().await;
    let queued = pool.submit(echo(2), Vec::new());
    drop(pool);

    assert_eq!(within(queued).await, Err(TaskError::Terminated));
    script.open("drop");
    assert_eq!(within(running).await?["value"], json!(1));
    Ok(())
}
