// src/graph/task_graph.rs

//! Arena-backed task DAG.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]; predecessor
//! and successor lists are kept in sync on every mutation. Every mutation
//! only adds edges towards freshly added nodes (or, for
//! [`TaskGraph::add_dependency`], checks reachability first), so the graph
//! stays acyclic by construction.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{LockdagError, Result};
use crate::task::TaskNode;

use super::guard::TaskGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        NodeId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub work: TaskNode,
    pub guard: TaskGuard,
    preds: Vec<NodeId>,
    succs: Vec<NodeId>,
}

impl GraphNode {
    pub fn predecessors(&self) -> &[NodeId] {
        &self.preds
    }

    pub fn successors(&self) -> &[NodeId] {
        &self.succs
    }
}

/// Result of [`TaskGraph::splice`]: where the sub-graph landed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Splice {
    /// Ids of every inserted node, in the sub-graph's own order.
    pub inserted: Vec<NodeId>,
    /// Inserted nodes wired directly after the expanded node.
    pub entries: Vec<NodeId>,
    /// Inserted nodes that took over the expanded node's successors.
    pub leaves: Vec<NodeId>,
    /// The expanded node's former successors.
    pub rewired: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<GraphNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&GraphNode> {
        self.nodes.get(id.0).ok_or(LockdagError::UnknownNode(id.0))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.preds.as_slice()).unwrap_or(&[])
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.succs.as_slice()).unwrap_or(&[])
    }

    /// Nodes without predecessors.
    pub fn entries(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.preds.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes without successors.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.succs.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(LockdagError::UnknownNode(id.0))
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from.0].succs.contains(&to) {
            self.nodes[from.0].succs.push(to);
            self.nodes[to.0].preds.push(from);
        }
    }

    fn unlink(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].succs.retain(|s| *s != to);
        self.nodes[to.0].preds.retain(|p| *p != from);
    }

    fn push(&mut self, work: TaskNode, guard: TaskGuard) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            work,
            guard,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        id
    }

    /// Add a node that depends on `predecessors` (none = an entry node).
    pub fn add_task(
        &mut self,
        work: TaskNode,
        guard: TaskGuard,
        predecessors: &[NodeId],
    ) -> Result<NodeId> {
        for pred in predecessors {
            self.check(*pred)?;
        }
        let id = self.push(work, guard);
        for pred in predecessors {
            self.link(*pred, id);
        }
        Ok(id)
    }

    /// Add an entry node (no predecessors).
    pub fn add_entry(&mut self, work: TaskNode, guard: TaskGuard) -> NodeId {
        self.push(work, guard)
    }

    /// Add a node after every current leaf. On an empty graph the node
    /// becomes the sole entry.
    pub fn append_task(&mut self, work: TaskNode, guard: TaskGuard) -> NodeId {
        let leaves = self.leaves();
        let id = self.push(work, guard);
        for leaf in leaves {
            self.link(leaf, id);
        }
        id
    }

    /// Merge `sub` into this graph, keeping its internal edges and guards.
    ///
    /// With a `gate`, every entry node of `sub` gains `gate` as predecessor;
    /// without one, `sub` becomes a parallel branch. Returns the new ids of
    /// `sub`'s nodes, indexed like `sub`.
    pub fn add_task_graph(&mut self, sub: TaskGraph, gate: Option<NodeId>) -> Result<Vec<NodeId>> {
        if let Some(gate) = gate {
            self.check(gate)?;
        }
        let sub_entries = sub.entries();
        let ids = self.absorb(sub);
        if let Some(gate) = gate {
            for entry in sub_entries {
                self.link(gate, ids[entry.0]);
            }
        }
        Ok(ids)
    }

    /// Merge `sub` so that all of its entries run after every current leaf.
    pub fn append_task_graph(&mut self, sub: TaskGraph) -> Vec<NodeId> {
        let leaves = self.leaves();
        let sub_entries = sub.entries();
        let ids = self.absorb(sub);
        for leaf in leaves {
            for entry in &sub_entries {
                self.link(leaf, ids[entry.0]);
            }
        }
        ids
    }

    /// Add an edge `from → to` between existing nodes. Rejected if it would
    /// close a cycle.
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if from == to || self.reaches(to, from) {
            return Err(LockdagError::GraphCycle(format!(
                "edge {} -> {} ('{}' -> '{}') would close a cycle",
                from,
                to,
                self.nodes[from.0].work.name(),
                self.nodes[to.0].work.name()
            )));
        }
        self.link(from, to);
        Ok(())
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.nodes[id.0].succs.iter().copied());
            }
        }
        false
    }

    /// Append `sub`'s nodes with remapped ids and return the mapping.
    fn absorb(&mut self, sub: TaskGraph) -> Vec<NodeId> {
        let offset = self.nodes.len();
        let remap = |ids: Vec<NodeId>| -> Vec<NodeId> {
            ids.into_iter().map(|id| NodeId(id.0 + offset)).collect()
        };

        let mut ids = Vec::with_capacity(sub.nodes.len());
        for node in sub.nodes {
            ids.push(NodeId(self.nodes.len()));
            self.nodes.push(GraphNode {
                work: node.work,
                guard: node.guard,
                preds: remap(node.preds),
                succs: remap(node.succs),
            });
        }
        ids
    }

    /// Replace node `at` by `sub` for the purpose of downstream ordering.
    ///
    /// `at` stays in the graph (it has already run). `sub`'s entries are
    /// wired after `at`, `sub`'s leaves take over `at`'s former successors,
    /// and the direct `at → successor` edges are removed. An empty `sub`
    /// leaves the graph untouched.
    pub fn splice(&mut self, at: NodeId, sub: TaskGraph) -> Result<Splice> {
        self.check(at)?;
        if sub.is_empty() {
            return Ok(Splice::default());
        }

        let sub_entries = sub.entries();
        let sub_leaves = sub.leaves();
        let rewired = self.nodes[at.0].succs.clone();

        let inserted = self.absorb(sub);
        let entries: Vec<NodeId> = sub_entries.iter().map(|e| inserted[e.0]).collect();
        let leaves: Vec<NodeId> = sub_leaves.iter().map(|l| inserted[l.0]).collect();

        for succ in &rewired {
            self.unlink(at, *succ);
        }
        for entry in &entries {
            self.link(at, *entry);
        }
        for leaf in &leaves {
            for succ in &rewired {
                self.link(*leaf, *succ);
            }
        }

        Ok(Splice {
            inserted,
            entries,
            leaves,
            rewired,
        })
    }

    /// Every transitive predecessor of `id`.
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.predecessors(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.predecessors(next).iter().copied());
            }
        }
        seen
    }

    /// Topological order of every node, or `GraphCycle` if there is none.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (id, node) in self.nodes() {
            graph.add_node(id.0);
            for succ in &node.succs {
                graph.add_edge(id.0, succ.0, ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(NodeId).collect()),
            Err(cycle) => {
                let idx = cycle.node_id();
                Err(LockdagError::GraphCycle(format!(
                    "cycle detected in task graph involving node {} ('{}')",
                    idx,
                    self.nodes[idx].work.name()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskContext, TaskFuture};

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

    fn name(g: &TaskGraph, id: NodeId) -> String {
        g.node(id).unwrap().work.name()
    }

    const OK: TaskGuard = TaskGuard::AllPredecessorsSucceeded;

    #[test]
    fn append_task_attaches_to_all_leaves() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), OK);
        let b = g.add_entry(n("b"), OK);
        let c = g.append_task(n("c"), TaskGuard::AllPredecessorsCompleted);

        assert_eq!(g.predecessors(c), &[a, b]);
        assert_eq!(g.entries(), vec![a, b]);
        assert_eq!(g.leaves(), vec![c]);
    }

    #[test]
    fn append_on_empty_graph_creates_entry() {
        let mut g = TaskGraph::new();
        let a = g.append_task(n("a"), OK);
        assert_eq!(g.entries(), vec![a]);
        assert!(g.predecessors(a).is_empty());
    }

    #[test]
    fn add_task_rejects_unknown_predecessor() {
        let mut g = TaskGraph::new();
        let err = g.add_task(n("a"), OK, &[NodeId(3)]).unwrap_err();
        assert!(matches!(err, LockdagError::UnknownNode(3)));
    }

    #[test]
    fn gated_merge_wires_sub_entries_after_gate() {
        let mut g = TaskGraph::new();
        let lock = g.add_entry(n("lock"), TaskGuard::AllPredecessorsCompleted);

        let mut sub = TaskGraph::new();
        let x = sub.add_entry(n("x"), OK);
        sub.add_task(n("y"), OK, &[x]).unwrap();

        let ids = g.add_task_graph(sub, Some(lock)).unwrap();
        assert_eq!(g.predecessors(ids[0]), &[lock]);
        assert_eq!(g.predecessors(ids[1]), &[ids[0]]);
        assert_eq!(g.node(ids[1]).unwrap().guard, OK);
    }

    #[test]
    fn ungated_merge_is_parallel_branch() {
        let mut g = TaskGraph::new();
        g.add_entry(n("a"), OK);
        let mut sub = TaskGraph::new();
        sub.add_entry(n("b"), OK);

        g.add_task_graph(sub, None).unwrap();
        assert_eq!(g.entries().len(), 2);
    }

    #[test]
    fn add_dependency_rejects_cycles() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), OK);
        let b = g.add_task(n("b"), OK, &[a]).unwrap();

        assert!(matches!(g.add_dependency(b, a), Err(LockdagError::GraphCycle(_))));
        assert!(matches!(g.add_dependency(a, a), Err(LockdagError::GraphCycle(_))));
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn splice_rewires_successors_to_sub_leaves() {
        // a -> m -> z, m expands into x -> {y1, y2}
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), OK);
        let m = g.add_task(n("m"), OK, &[a]).unwrap();
        let z = g.add_task(n("z"), OK, &[m]).unwrap();

        let mut sub = TaskGraph::new();
        let x = sub.add_entry(n("x"), OK);
        sub.add_task(n("y1"), OK, &[x]).unwrap();
        sub.add_task(n("y2"), OK, &[x]).unwrap();

        let splice = g.splice(m, sub).unwrap();
        assert_eq!(splice.rewired, vec![z]);
        assert_eq!(splice.entries.len(), 1);
        assert_eq!(splice.leaves.len(), 2);

        assert_eq!(g.successors(m), splice.entries.as_slice());
        assert_eq!(g.predecessors(z), splice.leaves.as_slice());
        assert!(!g.predecessors(z).contains(&m));

        let order: Vec<String> = g
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|id| name(&g, id))
            .collect();
        let pos = |s: &str| order.iter().position(|o| o == s).unwrap();
        assert!(pos("m") < pos("x"));
        assert!(pos("y1") < pos("z") && pos("y2") < pos("z"));
    }

    #[test]
    fn empty_splice_is_pass_through() {
        let mut g = TaskGraph::new();
        let m = g.add_entry(n("m"), OK);
        let z = g.add_task(n("z"), OK, &[m]).unwrap();

        let splice = g.splice(m, TaskGraph::new()).unwrap();
        assert_eq!(splice, Splice::default());
        assert_eq!(g.predecessors(z), &[m]);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn ancestors_are_transitive() {
        let mut g = TaskGraph::new();
        let a = g.add_entry(n("a"), OK);
        let b = g.add_task(n("b"), OK, &[a]).unwrap();
        let c = g.add_entry(n("c"), OK);
        let d = g.add_task(n("d"), OK, &[b, c]).unwrap();

        let anc: Vec<NodeId> = g.ancestors(d).into_iter().collect();
        assert_eq!(anc, vec![a, b, c]);
        assert!(g.ancestors(a).is_empty());
    }
}
