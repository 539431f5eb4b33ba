// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::types::StoreKind;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [engine]
/// worker_pool_size = 40
/// max_concurrent_jobs = 10
///
/// [lock]
/// acquire_timeout = "1h"
/// upgrade_timeout = "30s"
///
/// [store]
/// kind = "sqlite"
/// path = "lockdag.db"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub lock: LockSection,

    #[serde(default)]
    pub store: StoreSection,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Worker permits shared by every job; bounds concurrently executing nodes.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Jobs allowed to run at once. Further jobs stay QUEUED.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_worker_pool_size() -> usize {
    40
}

fn default_max_concurrent_jobs() -> usize {
    10
}

fn default_event_buffer() -> usize {
    256
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// `[lock]` section. Durations are strings such as `"250ms"`, `"30s"`, `"1h"`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: String,

    #[serde(default = "default_upgrade_timeout")]
    pub upgrade_timeout: String,
}

fn default_acquire_timeout() -> String {
    "1h".to_string()
}

fn default_upgrade_timeout() -> String {
    "30s".to_string()
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            acquire_timeout: default_acquire_timeout(),
            upgrade_timeout: default_upgrade_timeout(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub kind: StoreKind,

    /// Database file for `kind = "sqlite"`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("lockdag.db")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

/// Validated configuration.
///
/// Produced from [`RawConfigFile`] via `TryFrom` (see `validate.rs`); the
/// duration strings have been parsed and the sizes checked.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub store: StoreSection,
}

impl ConfigFile {
    /// Build without validation. Callers must have checked the values.
    pub(crate) fn new_unchecked(engine: EngineSettings, store: StoreSection) -> Self {
        Self { engine, store }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            store: StoreSection::default(),
        }
    }
}
