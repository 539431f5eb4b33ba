// src/exec/node_runner.rs

//! Running a single graph node on the worker pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{NodeResult, RunEvent};
use crate::exec::pool::WorkerPool;
use crate::graph::{NodeId, TaskGraph};
use crate::job::{JobId, TaskId};
use crate::lock::{LockManager, LockSettings};
use crate::store::{JobStore, Transaction};
use crate::task::{TaskContext, TaskNode};

/// A node handed from a job runner to the executor.
#[derive(Clone)]
pub struct DispatchedNode {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub node: NodeId,
    pub name: String,
    pub work: TaskNode,
}

/// Everything a worker needs besides the node itself. Cheap to clone; one
/// instance is shared by every job of an engine.
#[derive(Clone)]
pub struct NodeExecutor {
    pool: WorkerPool,
    store: Arc<dyn JobStore>,
    locks: Arc<LockManager>,
    lock_settings: LockSettings,
}

impl NodeExecutor {
    pub fn new(
        pool: WorkerPool,
        store: Arc<dyn JobStore>,
        locks: Arc<LockManager>,
        lock_settings: LockSettings,
    ) -> Self {
        Self {
            pool,
            store,
            locks,
            lock_settings,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Spawn the node onto the runtime. Progress comes back on `events`.
    pub(crate) fn spawn(&self, node: DispatchedNode, events: mpsc::Sender<RunEvent>) {
        let exec = self.clone();
        tokio::spawn(async move {
            exec.run(node, events).await;
        });
    }

    /// Wait for a worker slot, run the node, report the outcome.
    ///
    /// `NodeStarted` is sent only once a slot is held, so a node stays
    /// QUEUED while the pool is saturated.
    async fn run(self, node: DispatchedNode, events: mpsc::Sender<RunEvent>) {
        let id = node.node;
        let _permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id = node.job_id, task = %node.name, "worker pool closed before task could start");
                let _ = events
                    .send(RunEvent::NodeFinished {
                        node: id,
                        result: NodeResult::Failed {
                            reason: "worker pool closed before the task could start".to_string(),
                        },
                    })
                    .await;
                return;
            }
        };

        if events.send(RunEvent::NodeStarted(id)).await.is_err() {
            debug!(job_id = node.job_id, task = %node.name, "job runner gone; not starting task");
            return;
        }

        let result = self.execute(node).await;

        if events
            .send(RunEvent::NodeFinished { node: id, result })
            .await
            .is_err()
        {
            debug!(node = %id, "job runner gone; dropping task result");
        }
    }

    async fn execute(&self, node: DispatchedNode) -> NodeResult {
        let DispatchedNode {
            job_id,
            task_id,
            name,
            work,
            ..
        } = node;

        info!(job_id, task_id, task = %name, meta = work.is_meta(), "task started");

        let mut ctx = TaskContext::new(job_id, task_id, Arc::clone(&self.locks), self.lock_settings);
        if work.transactional() {
            match self.store.begin() {
                Ok(tx) => ctx = ctx.with_transaction(tx),
                Err(err) => {
                    error!(job_id, task_id, task = %name, error = %err, "could not open transaction");
                    return NodeResult::Failed {
                        reason: format!("could not open transaction: {err}"),
                    };
                }
            }
        }

        // The body runs in its own tokio task so a panic is contained and
        // reported as a failure of this node only.
        let joined = tokio::spawn(async move {
            let outcome = match &work {
                TaskNode::Leaf(task) => task.execute(&mut ctx).await.map(|()| None),
                TaskNode::Meta(meta) => meta.expand(&mut ctx).await.map(Some),
            };
            (outcome, ctx)
        })
        .await;

        let result = match joined {
            Ok((outcome, mut ctx)) => settle(outcome, ctx.take_transaction()),
            Err(join_err) => NodeResult::Failed {
                reason: format!("task panicked: {join_err}"),
            },
        };

        match &result {
            NodeResult::Succeeded { expansion } => info!(
                job_id,
                task_id,
                task = %name,
                expanded = expansion.as_ref().map_or(0, TaskGraph::len),
                "task succeeded"
            ),
            NodeResult::Failed { reason } => {
                warn!(job_id, task_id, task = %name, reason = %reason, "task failed")
            }
        }
        result
    }
}

/// Commit on success, roll back on failure. A failed commit fails the node.
fn settle(
    outcome: anyhow::Result<Option<TaskGraph>>,
    transaction: Option<Box<dyn Transaction>>,
) -> NodeResult {
    match outcome {
        Ok(expansion) => {
            if let Some(tx) = transaction {
                if let Err(err) = tx.commit() {
                    return NodeResult::Failed {
                        reason: format!("commit failed: {err}"),
                    };
                }
            }
            NodeResult::Succeeded { expansion }
        }
        Err(err) => {
            if let Some(tx) = transaction {
                tx.rollback();
            }
            NodeResult::Failed {
                reason: format!("{err:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::task::{MetaTask, Task, TaskFuture};

    struct Writes {
        fail: bool,
    }

    impl Task for Writes {
        fn name(&self) -> String {
            "writes".to_string()
        }

        fn transactional(&self) -> bool {
            true
        }

        fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                let tx = ctx
                    .transaction()
                    .ok_or_else(|| anyhow::anyhow!("no transaction"))?;
                tx.put("k", "v");
                if self.fail {
                    anyhow::bail!("boom");
                }
                Ok(())
            })
        }
    }

    struct Panics;

    impl Task for Panics {
        fn name(&self) -> String {
            "panics".to_string()
        }

        fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
            Box::pin(async { kaboom() })
        }
    }

    fn kaboom() -> anyhow::Result<()> {
        panic!("kaboom")
    }

    struct Expands;

    impl MetaTask for Expands {
        fn name(&self) -> String {
            "expands".to_string()
        }

        fn expand<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<TaskGraph>> {
            Box::pin(async {
                let mut g = TaskGraph::new();
                g.add_entry(TaskNode::leaf(Panics), Default::default());
                Ok(g)
            })
        }
    }

    fn executor(store: Arc<MemoryStore>) -> NodeExecutor {
        NodeExecutor::new(
            WorkerPool::new(2),
            store,
            Arc::new(LockManager::new()),
            LockSettings::default(),
        )
    }

    fn dispatched(work: TaskNode) -> DispatchedNode {
        DispatchedNode {
            job_id: 1,
            task_id: 1,
            node: NodeId::from_index(0),
            name: work.name(),
            work,
        }
    }

    #[tokio::test]
    async fn transactional_success_commits() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(Arc::clone(&store));

        let result = exec.execute(dispatched(TaskNode::leaf(Writes { fail: false }))).await;

        assert!(matches!(result, NodeResult::Succeeded { expansion: None }));
        assert_eq!(store.committed("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn transactional_failure_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(Arc::clone(&store));

        let result = exec.execute(dispatched(TaskNode::leaf(Writes { fail: true }))).await;

        match result {
            NodeResult::Failed { reason } => assert!(reason.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.committed("k"), None);
    }

    #[tokio::test]
    async fn panic_is_reported_as_failure() {
        let exec = executor(Arc::new(MemoryStore::new()));
        let result = exec.execute(dispatched(TaskNode::leaf(Panics))).await;

        match result {
            NodeResult::Failed { reason } => assert!(reason.contains("panicked")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn meta_task_returns_its_expansion() {
        let exec = executor(Arc::new(MemoryStore::new()));
        let result = exec.execute(dispatched(TaskNode::meta(Expands))).await;

        match result {
            NodeResult::Succeeded { expansion: Some(g) } => assert_eq!(g.len(), 1),
            other => panic!("expected expansion, got {other:?}"),
        }
    }
}
