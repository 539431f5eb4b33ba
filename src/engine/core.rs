// src/engine/core.rs

//! Pure per-job scheduling state machine.
//!
//! `JobRunCore` owns the live task graph of one job plus the state of every
//! node. It consumes node completions and returns [`CoreCommand`]s telling
//! the IO shell (`engine::runner`) what to persist and what to run next.
//!
//! No Tokio, no store, no locks: everything here is synchronous and
//! deterministic, so the scheduling rules can be tested in isolation.

use anyhow::anyhow;
use tracing::debug;

use crate::errors::{LockdagError, Result};
use crate::graph::{Eligibility, NodeId, Splice, TaskGraph, TerminalState};
use crate::job::JobStatus;

/// Per-node lifecycle inside a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    /// Handed to the worker pool, not yet executing.
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            NodeState::Succeeded => Some(TerminalState::Succeeded),
            NodeState::Failed => Some(TerminalState::Failed),
            NodeState::Skipped => Some(TerminalState::Skipped),
            NodeState::Pending | NodeState::Queued | NodeState::Running => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.terminal().is_some()
    }
}

/// How a dispatched node ended.
#[derive(Debug)]
pub enum NodeResult {
    /// `expansion` is the graph a meta-task returned (`None` for leaves).
    Succeeded { expansion: Option<TaskGraph> },
    Failed { reason: String },
}

/// What the IO shell must do after a core step. Commands are emitted in the
/// order they must be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// A meta-task's graph was spliced in after `parent`.
    Spliced { parent: NodeId, splice: Splice },
    /// Nodes whose guard said skip; they are terminal already.
    Skip(Vec<NodeId>),
    /// Nodes that became eligible and must be run.
    Dispatch(Vec<NodeId>),
    /// Every node is terminal.
    Finish(JobStatus),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
}

impl CoreStep {
    pub fn dispatched(&self) -> Vec<NodeId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn skipped(&self) -> Vec<NodeId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Skip(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn finished(&self) -> Option<JobStatus> {
        self.commands.iter().find_map(|c| match c {
            CoreCommand::Finish(status) => Some(*status),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct JobRunCore {
    graph: TaskGraph,
    states: Vec<NodeState>,
}

impl JobRunCore {
    /// Fails with `GraphCycle` if `graph` has no topological order.
    pub fn new(graph: TaskGraph) -> Result<Self> {
        graph.topological_order()?;
        let states = vec![NodeState::Pending; graph.len()];
        Ok(Self { graph, states })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.states.get(id.index()).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.states.iter().all(|s| s.is_terminal())
    }

    /// `Failed` if any node failed, else `Passed`.
    pub fn job_status(&self) -> JobStatus {
        if self.states.contains(&NodeState::Failed) {
            JobStatus::Failed
        } else {
            JobStatus::Passed
        }
    }

    /// Evaluate the entry nodes. An empty graph finishes immediately.
    pub fn start(&mut self) -> CoreStep {
        let entries = self.graph.entries();
        let mut step = CoreStep::default();
        self.evaluate(entries, &mut step);
        self.finish_if_done(&mut step);
        step
    }

    /// A queued node was picked up by a worker.
    pub fn mark_running(&mut self, id: NodeId) -> Result<()> {
        match self.states.get_mut(id.index()) {
            Some(state @ NodeState::Queued) => {
                *state = NodeState::Running;
                Ok(())
            }
            Some(other) => Err(LockdagError::Other(anyhow!(
                "node {id} reported running while {other:?}"
            ))),
            None => Err(LockdagError::UnknownNode(id.index())),
        }
    }

    /// Record the outcome of a dispatched node and advance the schedule.
    pub fn complete(&mut self, id: NodeId, result: NodeResult) -> Result<CoreStep> {
        let state = self
            .states
            .get(id.index())
            .copied()
            .ok_or(LockdagError::UnknownNode(id.index()))?;
        if !matches!(state, NodeState::Queued | NodeState::Running) {
            return Err(LockdagError::Other(anyhow!(
                "node {id} completed while {state:?}"
            )));
        }

        let mut step = CoreStep::default();
        match result {
            NodeResult::Failed { reason } => {
                debug!(node = %id, %reason, "node failed");
                self.states[id.index()] = NodeState::Failed;
            }
            NodeResult::Succeeded { expansion } => {
                self.states[id.index()] = NodeState::Succeeded;
                if let Some(sub) = expansion.filter(|g| !g.is_empty()) {
                    let splice = self.graph.splice(id, sub)?;
                    self.states
                        .resize(self.graph.len(), NodeState::Pending);
                    debug!(
                        node = %id,
                        inserted = splice.inserted.len(),
                        rewired = splice.rewired.len(),
                        "meta-task expansion spliced"
                    );
                    step.commands.push(CoreCommand::Spliced { parent: id, splice });
                }
            }
        }

        let candidates = self.graph.successors(id).to_vec();
        self.evaluate(candidates, &mut step);
        self.finish_if_done(&mut step);
        Ok(step)
    }

    fn terminal_of(&self, id: NodeId) -> Option<TerminalState> {
        self.states[id.index()].terminal()
    }

    fn ancestors_succeeded(&self, id: NodeId) -> bool {
        self.graph
            .ancestors(id)
            .into_iter()
            .all(|a| self.states[a.index()] == NodeState::Succeeded)
    }

    /// Evaluate guards for `candidates`, cascading through skipped nodes.
    fn evaluate(&mut self, candidates: Vec<NodeId>, step: &mut CoreStep) {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        let mut work = candidates;

        while let Some(id) = work.pop() {
            if self.states[id.index()] != NodeState::Pending {
                continue;
            }
            let Ok(node) = self.graph.node(id) else {
                continue;
            };

            let preds = node.predecessors().iter().map(|p| self.terminal_of(*p));
            match node.guard.evaluate(preds, || self.ancestors_succeeded(id)) {
                Eligibility::Wait => {}
                Eligibility::Run => {
                    self.states[id.index()] = NodeState::Queued;
                    ready.push(id);
                }
                Eligibility::Skip => {
                    debug!(node = %id, guard = %node.guard, "guard not satisfied; skipping");
                    self.states[id.index()] = NodeState::Skipped;
                    skipped.push(id);
                    work.extend(self.graph.successors(id).iter().copied());
                }
            }
        }

        if !skipped.is_empty() {
            skipped.sort();
            step.commands.push(CoreCommand::Skip(skipped));
        }
        if !ready.is_empty() {
            ready.sort();
            step.commands.push(CoreCommand::Dispatch(ready));
        }
    }

    fn finish_if_done(&self, step: &mut CoreStep) {
        if self.is_finished() {
            step.commands.push(CoreCommand::Finish(self.job_status()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGuard;
    use crate::task::{Task, TaskContext, TaskFuture, TaskNode};

    struct Noop(&'static str);

    impl Task for Noop {
        fn name(&self) -> String {
            self.0.to_string()
        }

        fn execute<'a>(&'a self, _ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn n(name: &'static str) -> TaskNode {
        TaskNode::leaf(Noop(name))
    }

    fn ok() -> NodeResult {
        NodeResult::Succeeded { expansion: None }
    }

    fn fail() -> NodeResult {
        NodeResult::Failed {
            reason: "boom".into(),
        }
    }

    const DONE: TaskGuard = TaskGuard::AllPredecessorsCompleted;
    const SUCC: TaskGuard = TaskGuard::AllPredecessorsSucceeded;

    #[test]
    fn empty_graph_finishes_passed_on_start() {
        let mut core = JobRunCore::new(TaskGraph::new()).unwrap();
        let step = core.start();
        assert_eq!(step.commands, vec![CoreCommand::Finish(JobStatus::Passed)]);
    }

    #[test]
    fn failure_skips_succeeded_successors_but_runs_completed_cleanup() {
        // lock -> {w1, w2} -> unlock
        let mut g = TaskGraph::new();
        let lock = g.add_entry(n("lock"), DONE);
        let w1 = g.add_task(n("w1"), SUCC, &[lock]).unwrap();
        let w2 = g.add_task(n("w2"), SUCC, &[lock]).unwrap();
        let unlock = g.append_task(n("unlock"), DONE);

        let mut core = JobRunCore::new(g).unwrap();
        assert_eq!(core.start().dispatched(), vec![lock]);

        let step = core.complete(lock, fail()).unwrap();
        assert_eq!(step.skipped(), vec![w1, w2]);
        assert_eq!(step.dispatched(), vec![unlock]);
        assert_eq!(step.finished(), None);

        let step = core.complete(unlock, ok()).unwrap();
        assert_eq!(step.finished(), Some(JobStatus::Failed));
    }

    #[test]
    fn node_waits_for_every_predecessor() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), SUCC);
        let b = g.add_entry(n("b"), SUCC);
        let c = g.add_task(n("c"), DONE, &[a, b]).unwrap();

        let mut core = JobRunCore::new(g).unwrap();
        assert_eq!(core.start().dispatched(), vec![a, b]);
        assert!(core.complete(a, ok()).unwrap().dispatched().is_empty());
        assert_eq!(core.state(c), Some(NodeState::Pending));
        assert_eq!(core.complete(b, fail()).unwrap().dispatched(), vec![c]);
    }

    #[test]
    fn skip_cascades_through_chains() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), SUCC);
        let b = g.add_task(n("b"), SUCC, &[a]).unwrap();
        let c = g.add_task(n("c"), SUCC, &[b]).unwrap();
        let d = g.add_task(n("d"), DONE, &[c]).unwrap();

        let mut core = JobRunCore::new(g).unwrap();
        core.start();
        let step = core.complete(a, fail()).unwrap();
        assert_eq!(step.skipped(), vec![b, c]);
        assert_eq!(step.dispatched(), vec![d]);
    }

    #[test]
    fn ancestors_guard_skips_after_distant_failure() {
        // a(fail) -> cleanup(DONE) -> z(ALL_ANCESTORS_SUCCEEDED)
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), SUCC);
        let cleanup = g.add_task(n("cleanup"), DONE, &[a]).unwrap();
        let z = g.add_task(n("z"), TaskGuard::AllAncestorsSucceeded, &[cleanup]).unwrap();

        let mut core = JobRunCore::new(g).unwrap();
        core.start();
        core.complete(a, fail()).unwrap();
        let step = core.complete(cleanup, ok()).unwrap();
        assert_eq!(step.skipped(), vec![z]);
        assert_eq!(step.finished(), Some(JobStatus::Failed));
    }

    #[test]
    fn expansion_is_spliced_before_successors() {
        // m -> z; m expands to x
        let mut g = TaskGraph::new();
        let m = g.add_entry(n("m"), SUCC);
        let z = g.add_task(n("z"), SUCC, &[m]).unwrap();

        let mut sub = TaskGraph::new();
        sub.add_entry(n("x"), SUCC);

        let mut core = JobRunCore::new(g).unwrap();
        core.start();
        let step = core
            .complete(
                m,
                NodeResult::Succeeded {
                    expansion: Some(sub),
                },
            )
            .unwrap();

        let x = NodeId::from_index(2);
        match &step.commands[0] {
            CoreCommand::Spliced { parent, splice } => {
                assert_eq!(*parent, m);
                assert_eq!(splice.inserted, vec![x]);
                assert_eq!(splice.rewired, vec![z]);
            }
            other => panic!("expected splice first, got {other:?}"),
        }
        assert_eq!(step.dispatched(), vec![x]);
        assert_eq!(core.state(z), Some(NodeState::Pending));

        let step = core.complete(x, ok()).unwrap();
        assert_eq!(step.dispatched(), vec![z]);
    }

    #[test]
    fn empty_expansion_passes_through() {
        let mut g = TaskGraph::new();
        let m = g.add_entry(n("m"), SUCC);
        let z = g.add_task(n("z"), SUCC, &[m]).unwrap();

        let mut core = JobRunCore::new(g).unwrap();
        core.start();
        let step = core
            .complete(
                m,
                NodeResult::Succeeded {
                    expansion: Some(TaskGraph::new()),
                },
            )
            .unwrap();
        assert_eq!(step.commands, vec![CoreCommand::Dispatch(vec![z])]);
    }

    #[test]
    fn completing_twice_is_rejected() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), SUCC);
        let mut core = JobRunCore::new(g).unwrap();
        core.start();
        core.mark_running(a).unwrap();
        core.complete(a, ok()).unwrap();
        assert!(core.complete(a, ok()).is_err());
        assert!(core.mark_running(a).is_err());
    }
}
