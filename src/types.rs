// src/types.rs

//! Small config-facing enums shared across modules.

use std::str::FromStr;

use serde::Deserialize;

/// Which persistence backend the engine writes job/task records to.
///
/// - `Memory`: records live only for the lifetime of the process (tests,
///   ad-hoc runs).
/// - `Sqlite`: records survive restarts; required for orphan recovery to
///   mean anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(format!(
                "invalid store kind: {other} (expected \"memory\" or \"sqlite\")"
            )),
        }
    }
}
