// src/exec/mod.rs

//! Node execution layer.
//!
//! This module is responsible for actually running graph nodes (leaf tasks
//! and meta-task expansions) and reporting back to the job runner via
//! `RunEvent`s.
//!
//! - [`pool`] is the engine-wide worker pool bounding concurrent nodes.
//! - [`node_runner`] runs a single node: permit, context, transaction,
//!   panic isolation, and the completion event.

pub mod node_runner;
pub mod pool;

pub use node_runner::{DispatchedNode, NodeExecutor};
pub use pool::WorkerPool;
