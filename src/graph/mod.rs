// src/graph/mod.rs

//! Task graph algebra.
//!
//! - [`task_graph`]: the arena-backed `TaskGraph` (add / append / merge /
//!   splice, entries and leaves, topological order).
//! - [`guard`]: `TaskGuard` and its node-local eligibility rule.
//!
//! The graph is a plain value; it does not know about locks, persistence or
//! scheduling. The engine owns a live copy per job and mutates it only
//! through [`TaskGraph::splice`].

pub mod guard;
pub mod task_graph;

pub use guard::{Eligibility, TaskGuard, TerminalState};
pub use task_graph::{GraphNode, NodeId, Splice, TaskGraph};
