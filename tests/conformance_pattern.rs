// tests/conformance_pattern.rs

use std::error::Error;
use std::time::Duration;

use lockdag::conformance::{EntityConformanceTask, SubEntityPlanner, locked_fanout};
use lockdag::engine::JobRequest;
use lockdag::graph::{TaskGraph, TaskGuard};
use lockdag::job::{JobStatus, TaskStatus};
use lockdag::lock::{LockHandle, LockObjectReference, LockRequest, LockType, ObjectType};
use lockdag::task::{LockObjectTask, Task, TaskContext, TaskFuture, TaskNode, UnlockObjectTask};
use lockdag_test_utils::builders::{EngineBuilder, object};
use lockdag_test_utils::fake_tasks::{ExecutionLog, FailingTask, RecordingTask};
use lockdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Logs `<name>:<mode>` with the object's current lock mode.
struct ModeRecorder {
    name: String,
    object: LockObjectReference,
    log: ExecutionLog,
}

impl ModeRecorder {
    fn node(name: &str, object: &LockObjectReference, log: &ExecutionLog) -> TaskNode {
        TaskNode::leaf(ModeRecorder {
            name: name.to_string(),
            object: object.clone(),
            log: log.clone(),
        })
    }
}

impl Task for ModeRecorder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mode = ctx
                .locks()
                .lock_info(&self.object)
                .and_then(|info| info.mode)
                .map_or_else(|| "none".to_string(), |m| m.to_string());
            self.log.push(format!("{}:{mode}", self.name));
            Ok(())
        })
    }
}

/// One recorder per sub-entity.
struct RecorderPlanner {
    object: LockObjectReference,
    subs: usize,
    log: ExecutionLog,
}

impl SubEntityPlanner for RecorderPlanner {
    fn plan<'a>(
        &'a self,
        _ctx: &'a mut TaskContext,
        _lock: &'a LockHandle,
    ) -> TaskFuture<'a, anyhow::Result<Vec<TaskGraph>>> {
        Box::pin(async move {
            let mut graphs = Vec::new();
            for i in 0..self.subs {
                let mut g = TaskGraph::new();
                g.add_entry(
                    ModeRecorder::node(&format!("sub{i}"), &self.object, &self.log),
                    TaskGuard::AllPredecessorsSucceeded,
                );
                graphs.push(g);
            }
            Ok(graphs)
        })
    }
}

/// Hands the lent lock to a nested conformance task.
struct NestingPlanner {
    object: LockObjectReference,
    log: ExecutionLog,
}

impl SubEntityPlanner for NestingPlanner {
    fn plan<'a>(
        &'a self,
        _ctx: &'a mut TaskContext,
        lock: &'a LockHandle,
    ) -> TaskFuture<'a, anyhow::Result<Vec<TaskGraph>>> {
        Box::pin(async move {
            let inner = EntityConformanceTask::with_lock(
                lock.clone(),
                RecorderPlanner {
                    object: self.object.clone(),
                    subs: 1,
                    log: self.log.clone(),
                },
            );
            let mut g = TaskGraph::new();
            g.add_entry(TaskNode::meta(inner), TaskGuard::AllPredecessorsSucceeded);
            Ok(vec![g])
        })
    }
}

/// Runs a nested conformance check on the lent lock, then records the mode
/// the outer sub-work sees once the nested check has finished.
struct NestThenRecordPlanner {
    object: LockObjectReference,
    log: ExecutionLog,
}

impl SubEntityPlanner for NestThenRecordPlanner {
    fn plan<'a>(
        &'a self,
        _ctx: &'a mut TaskContext,
        lock: &'a LockHandle,
    ) -> TaskFuture<'a, anyhow::Result<Vec<TaskGraph>>> {
        Box::pin(async move {
            let inner = EntityConformanceTask::with_lock(
                lock.clone(),
                RecorderPlanner {
                    object: self.object.clone(),
                    subs: 0,
                    log: self.log.clone(),
                },
            );
            let mut g = TaskGraph::new();
            g.add_entry(TaskNode::meta(inner), TaskGuard::AllPredecessorsSucceeded);
            g.append_task(
                ModeRecorder::node("after_inner", &self.object, &self.log),
                TaskGuard::AllPredecessorsSucceeded,
            );
            Ok(vec![g])
        })
    }
}

#[tokio::test]
async fn fanout_runs_workers_under_the_lock_and_releases_it() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 1);

    let graph = locked_fanout(
        LockRequest::write(da.clone()),
        [
            ModeRecorder::node("w1", &da, &log),
            ModeRecorder::node("w2", &da, &log),
            TaskNode::leaf(FailingTask::new("w3", "w3 failed", &log)),
        ],
    )?;

    let job = with_timeout(engine.run(JobRequest::new("fanout", graph))).await?;

    assert_eq!(job.status, Some(JobStatus::Failed));
    assert!(log.contains("w1:WRITE"));
    assert!(log.contains("w2:WRITE"));
    let tasks = engine.tasks(job.id)?;
    let unlock = tasks.last().ok_or("no tasks")?;
    assert_eq!(unlock.status, Some(TaskStatus::Passed));
    assert!(engine.locks().lock_info(&da).is_none());
    Ok(())
}

#[tokio::test]
async fn fanout_releases_even_when_lock_never_granted() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new()
        .with_acquire_timeout(Duration::from_millis(40))
        .build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 2);

    let blocker = LockRequest::read(da.clone());
    assert!(engine.locks().try_acquire(&blocker));

    let graph = locked_fanout(
        LockRequest::write(da.clone()),
        [TaskNode::leaf(RecordingTask::new("worker", &log))],
    )?;
    let job = with_timeout(engine.run(JobRequest::new("blocked", graph))).await?;

    assert_eq!(job.status, Some(JobStatus::Failed));
    assert!(log.entries().is_empty());
    let statuses: Vec<Option<TaskStatus>> = engine.tasks(job.id)?.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![Some(TaskStatus::Failed), Some(TaskStatus::Skipped), Some(TaskStatus::Passed)]
    );

    engine.locks().release(&blocker);
    assert_eq!(engine.locks().active_objects(), 0);
    Ok(())
}

#[tokio::test]
async fn conformance_task_without_handle_owns_its_lock() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let log = ExecutionLog::new();
    let vc = object(ObjectType::VirtualizationConnector, 3);

    let check = EntityConformanceTask::new(
        vc.clone(),
        RecorderPlanner {
            object: vc.clone(),
            subs: 3,
            log: log.clone(),
        },
    );
    let mut g = TaskGraph::new();
    g.add_entry(TaskNode::meta(check), TaskGuard::default());
    g.append_task(ModeRecorder::node("after", &vc, &log), TaskGuard::AllPredecessorsCompleted);

    let job = with_timeout(engine.run(JobRequest::new("vc-conformance", g))).await?;

    assert_eq!(job.status, Some(JobStatus::Passed));
    for i in 0..3 {
        assert!(log.contains(&format!("sub{i}:WRITE")), "{:?}", log.entries());
    }
    assert!(log.contains("after:none"));

    let tasks = engine.tasks(job.id)?;
    // meta + after + lock + 3 subs + unlock
    assert_eq!(tasks.len(), 7);
    let meta = &tasks[0];
    assert_eq!(meta.children.len(), 5);
    assert!(meta.name.starts_with("Conformance check"));
    assert_eq!(meta.objects, vec![vc.clone()]);
    assert!(engine.locks().list_held().is_empty());
    Ok(())
}

#[tokio::test]
async fn conformance_task_with_borrowed_handle_upgrades_and_restores() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 4);

    let outer = LockRequest::new(da.clone(), LockType::Read);
    let handle = LockHandle::Owned(outer.clone());
    let check = EntityConformanceTask::with_lock(
        handle.lend(),
        RecorderPlanner {
            object: da.clone(),
            subs: 2,
            log: log.clone(),
        },
    );

    let mut g = TaskGraph::new();
    g.append_task(
        TaskNode::leaf(LockObjectTask::new(outer.clone())),
        TaskGuard::AllPredecessorsCompleted,
    );
    g.append_task(TaskNode::meta(check), TaskGuard::AllPredecessorsSucceeded);
    g.append_task(ModeRecorder::node("restored", &da, &log), TaskGuard::AllPredecessorsCompleted);
    g.append_task(
        TaskNode::leaf(UnlockObjectTask::new(handle)),
        TaskGuard::AllPredecessorsCompleted,
    );

    let job = with_timeout(engine.run(JobRequest::new("borrowed", g))).await?;

    assert_eq!(job.status, Some(JobStatus::Passed));
    assert!(log.contains("sub0:WRITE") && log.contains("sub1:WRITE"));
    // The meta-task gave the lock back at READ; the caller released it.
    assert!(log.contains("restored:READ"));
    assert!(engine.locks().lock_info(&da).is_none());
    Ok(())
}

#[tokio::test]
async fn denied_upgrade_skips_sub_work_and_keeps_callers_read_lock() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new()
        .with_upgrade_timeout(Duration::from_millis(40))
        .build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 5);

    // Another reader keeps the upgrade from ever being granted.
    let other_reader = LockRequest::read(da.clone());
    assert!(engine.locks().try_acquire(&other_reader));

    let outer = LockRequest::read(da.clone());
    let handle = LockHandle::Owned(outer.clone());
    let check = EntityConformanceTask::with_lock(
        handle.lend(),
        RecorderPlanner {
            object: da.clone(),
            subs: 1,
            log: log.clone(),
        },
    );

    let mut g = TaskGraph::new();
    g.append_task(
        TaskNode::leaf(LockObjectTask::new(outer.clone())),
        TaskGuard::AllPredecessorsCompleted,
    );
    g.append_task(TaskNode::meta(check), TaskGuard::AllPredecessorsSucceeded);
    g.append_task(ModeRecorder::node("restored", &da, &log), TaskGuard::AllPredecessorsCompleted);
    g.append_task(
        TaskNode::leaf(UnlockObjectTask::new(handle)),
        TaskGuard::AllPredecessorsCompleted,
    );

    let job = with_timeout(engine.run(JobRequest::new("denied", g))).await?;

    assert_eq!(job.status, Some(JobStatus::Failed));
    assert!(!log.contains("sub0:WRITE"));
    assert!(log.contains("restored:READ"));

    let tasks = engine.tasks(job.id)?;
    let upgrade = tasks
        .iter()
        .find(|t| t.name.starts_with("Upgrade"))
        .ok_or("no upgrade record")?;
    assert_eq!(upgrade.status, Some(TaskStatus::Failed));
    assert!(upgrade.fail_reason.as_deref().unwrap_or("").contains("not granted"));

    // Only the unrelated reader is left.
    assert_eq!(engine.locks().list_held().len(), 1);
    engine.locks().release(&other_reader);
    Ok(())
}

#[tokio::test]
async fn nested_conformance_borrows_the_outer_write_lock() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 6);

    let outer = EntityConformanceTask::new(
        da.clone(),
        NestingPlanner {
            object: da.clone(),
            log: log.clone(),
        },
    );
    let mut g = TaskGraph::new();
    g.add_entry(TaskNode::meta(outer), TaskGuard::default());

    let job = with_timeout(engine.run(JobRequest::new("nested", g))).await?;

    assert_eq!(job.status, Some(JobStatus::Passed));
    assert_eq!(log.entries(), vec!["sub0:WRITE"]);
    assert!(engine.locks().list_held().is_empty());
    Ok(())
}

#[tokio::test]
async fn nested_check_on_upgraded_read_lock_keeps_write_until_outer_restore() -> TestResult {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let log = ExecutionLog::new();
    let da = object(ObjectType::DistributedAppliance, 7);

    let outer = LockRequest::read(da.clone());
    let handle = LockHandle::Owned(outer.clone());
    let check = EntityConformanceTask::with_lock(
        handle.lend(),
        NestThenRecordPlanner {
            object: da.clone(),
            log: log.clone(),
        },
    );

    let mut g = TaskGraph::new();
    g.append_task(
        TaskNode::leaf(LockObjectTask::new(outer.clone())),
        TaskGuard::AllPredecessorsCompleted,
    );
    g.append_task(TaskNode::meta(check), TaskGuard::AllPredecessorsSucceeded);
    g.append_task(ModeRecorder::node("restored", &da, &log), TaskGuard::AllPredecessorsCompleted);
    g.append_task(
        TaskNode::leaf(UnlockObjectTask::new(handle)),
        TaskGuard::AllPredecessorsCompleted,
    );

    let job = with_timeout(engine.run(JobRequest::new("nested-read", g))).await?;

    assert_eq!(job.status, Some(JobStatus::Passed));
    assert_eq!(log.entries(), vec!["after_inner:WRITE", "restored:READ"]);
    assert!(engine.locks().list_held().is_empty());
    Ok(())
}
