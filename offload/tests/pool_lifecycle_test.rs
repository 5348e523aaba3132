use anyhow::Result;
use offload::{Operation, TaskError, TaskPool, Transferable, WorkerPool};
use serde_json::json;

mod test_helpers;
use test_helpers::{echo, eventually, unit_of, wait, within, GateScript, RecordingReporter};

#[tokio::test]
async fn test_tasks_run_in_parallel_and_queue_in_order() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(2).catalog(&script.catalog("gates")).build()?;

    let a = pool.submit(wait("a", 1), Vec::new());
    let b = pool.submit(wait("b", 2), Vec::new());
    script.started().await;
    script.started().await;

    let c = pool.submit(echo(3), Vec::new());
    let status = pool.status().await;
    assert_eq!(status.busy_units, 2);
    assert_eq!(status.queued_tasks, 1);

    script.open("a");
    let a = within(a).await?;
    let c = within(c).await?;
    assert_eq!(a["value"], json!(1));
    assert_eq!(c["value"], json!(3));
    // Only A's unit was free when C was dispatched.
    assert_eq!(unit_of(&c), unit_of(&a));

    script.open("b");
    let b = within(b).await?;
    assert_ne!(unit_of(&b), unit_of(&a));

    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_initialize_is_idempotent() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(3).catalog(&script.catalog("gates")).build()?;

    let (first, second, third) = within(async { tokio::join!(pool.initialize(), pool.initialize(), pool.initialize()) }).await;
    first?;
    second?;
    third?;
    assert_eq!(script.init_count(), 3);

    within(pool.initialize()).await?;
    assert_eq!(script.init_count(), 3);

    let status = pool.status().await;
    assert!(status.initialized);
    assert_eq!(status.live_units, 3);
    assert_eq!(status.idle_units, 3);

    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_submit_initializes_implicitly() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(2).catalog(&script.catalog("gates")).build()?;
    assert_eq!(pool.live_units(), 0);

    let result = within(pool.submit(echo(7), Vec::new())).await?;
    assert_eq!(result["value"], json!(7));

    let status = pool.status().await;
    assert_eq!(status.live_units, 2);
    assert_eq!(status.completed_tasks, 1);
    eventually(|| pool.live_units() == 2).await;

    // Joins the round the submission started instead of spawning more units.
    within(pool.initialize()).await?;
    assert!(pool.status().await.initialized);
    assert_eq!(script.init_count(), 2);

    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_excess_tasks_wait_in_queue() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(2).catalog(&script.catalog("gates")).build()?;

    let blocked = vec![pool.submit(wait("x", 0), Vec::new()), pool.submit(wait("x", 1), Vec::new())];
    script.started().await;
    script.started().await;

    let queued: Vec<_> = (10..13).map(|n| pool.submit(echo(n), Vec::new())).collect();
    let status = pool.status().await;
    assert_eq!(status.live_units, 2);
    assert_eq!(status.queued_tasks, 3);
    eventually(|| pool.queued_tasks() == 3).await;

    script.open("x");
    script.open("x");
    for handle in blocked {
        within(handle).await?;
    }
    for (n, handle) in (10..13).zip(queued) {
        assert_eq!(within(handle).await?["value"], json!(n));
    }
    assert_eq!(pool.status().await.queued_tasks, 0);

    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_task_error_rejects_only_that_task() -> Result<()> {
    let script = GateScript::new();
    let reporter = RecordingReporter::new();
    let pool = WorkerPool::builder("gates")
        .pool_size(1)
        .catalog(&script.catalog("gates"))
        .error_reporter(reporter.clone())
        .build()?;

    let failed = within(pool.submit(json!({"op": "fail", "message": "bad input"}), Vec::new())).await;
    assert_eq!(failed, Err(TaskError::Failed("bad input".to_string())));

    // The unit survives a script error.
    let ok = within(pool.submit(echo(2), Vec::new())).await?;
    assert_eq!(ok["value"], json!(2));

    let status = pool.status().await;
    assert_eq!(status.failed_tasks, 1);
    assert_eq!(status.completed_tasks, 1);
    assert_eq!(status.replaced_units, 0);

    assert_eq!(reporter.count(Operation::Task), 1);
    let report = &reporter.reports()[0];
    assert_eq!(report.context.script.as_deref(), Some("gates"));
    assert!(report.context.task_id.is_some());

    within(pool.terminate()).await?;
    Ok(())
}

#[tokio::test]
async fn test_transferables_are_moved_into_the_unit() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(1).catalog(&script.catalog("gates")).build()?;

    let transfer: Vec<Transferable> = vec![Box::new(vec![1u8, 2, 3]), Box::new(vec![10u8])];
    let total = within(pool.submit(json!({"op": "sum"}), transfer)).await?;
    assert_eq!(total, json!(16));

    within(pool.terminate()).await?;
    Ok(())
}

async fn square_through_trait(pool: &impl TaskPool, n: u64) -> Result<u64> {
    pool.initialize().await?;
    let result = pool.submit(echo(n * n), Vec::new()).await?;
    Ok(result["value"].as_u64().unwrap_or_default())
}

#[tokio::test]
async fn test_pool_through_task_pool_trait() -> Result<()> {
    let script = GateScript::new();
    let pool = WorkerPool::builder("gates").pool_size(4).catalog(&script.catalog("gates")).build()?;

    assert_eq!(TaskPool::pool_size(&pool), 4);
    assert_eq!(within(square_through_trait(&pool, 9)).await?, 81);

    within(TaskPool::terminate(&pool)).await?;
    assert!(pool.is_shutting_down());
    Ok(())
}

#[tokio::test]
async fn test_closure_script_from_global_catalog() -> Result<()> {
    offload::ScriptCatalog::global().register(
        "lifecycle-double",
        |_ctx: &offload::UnitContext, payload: offload::Payload, _transfer: Vec<Transferable>| -> anyhow::Result<offload::Payload> {
            Ok(json!(payload.as_i64().unwrap_or_default() * 2))
        },
    )?;

    let pool = WorkerPool::builder("lifecycle-double").pool_size(2).build()?;
    let handles: Vec<_> = (1..=6).map(|n| pool.submit(json!(n), Vec::new())).collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(within(handle).await?);
    }
    assert_eq!(results, (1..=6).map(|n| json!(n * 2)).collect::<Vec<_>>());

    within(pool.terminate()).await?;
    Ok(())
}
