// src/conformance/mod.rs

//! Lock / work / unlock composition for multi-entity sweeps.
//!
//! - [`fanout`]: build "lock, fan of workers, unlock" graphs around one
//!   object.
//! - [`entity`]: a meta-task that plans per-sub-entity work at run time and
//!   wraps it either in its own lock or in an upgrade of a lock handed to it
//!   by its caller.

pub mod entity;
pub mod fanout;

pub use entity::{EntityConformanceTask, SubEntityPlanner};
pub use fanout::{locked_fanout, locked_subgraphs, upgraded_subgraphs};
