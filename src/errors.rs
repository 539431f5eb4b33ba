// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

use crate::lock::{LockObjectReference, LockType};

#[derive(Error, Debug)]
pub enum LockdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in task graph: {0}")]
    GraphCycle(String),

    #[error("Unknown graph node: {0}")]
    UnknownNode(usize),

    #[error("Timed out after {waited:?} waiting for {lock_type} lock on {object}")]
    LockTimeout {
        object: LockObjectReference,
        lock_type: LockType,
        waited: Duration,
    },

    #[error("Upgrade to WRITE lock on {object} was not granted in time")]
    LockUpgradeDenied { object: LockObjectReference },

    #[error("Lock protocol violation: {0}")]
    LockProtocol(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Job engine is shut down; submission rejected")]
    EngineShutdown,

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Job {job_id} ('{name}') was still in flight when the engine restarted")]
    OrphanedJobOnRestart { job_id: i64, name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for LockdagError {
    fn from(err: rusqlite::Error) -> Self {
        LockdagError::Store(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LockdagError>;
