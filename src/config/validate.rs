// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, EngineSection, LockSection, RawConfigFile};
use crate::engine::EngineSettings;
use crate::errors::{LockdagError, Result};
use crate::lock::LockSettings;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = LockdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_engine_section(&raw.engine)?;
        let lock = lock_settings(&raw.lock)?;

        let engine = EngineSettings {
            worker_pool_size: raw.engine.worker_pool_size,
            max_concurrent_jobs: raw.engine.max_concurrent_jobs,
            event_buffer: raw.engine.event_buffer,
            lock,
        };

        Ok(ConfigFile::new_unchecked(engine, raw.store))
    }
}

fn validate_engine_section(engine: &EngineSection) -> Result<()> {
    let checks = [
        ("worker_pool_size", engine.worker_pool_size),
        ("max_concurrent_jobs", engine.max_concurrent_jobs),
        ("event_buffer", engine.event_buffer),
    ];

    for (key, value) in checks {
        if value == 0 {
            return Err(LockdagError::ConfigError(format!(
                "[engine].{key} must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn lock_settings(section: &LockSection) -> Result<LockSettings> {
    let acquire_timeout = parse_duration(&section.acquire_timeout).map_err(|e| {
        LockdagError::ConfigError(format!("[lock].acquire_timeout: {e}"))
    })?;
    let upgrade_timeout = parse_duration(&section.upgrade_timeout).map_err(|e| {
        LockdagError::ConfigError(format!("[lock].upgrade_timeout: {e}"))
    })?;

    Ok(LockSettings {
        acquire_timeout,
        upgrade_timeout,
    })
}

/// Parse duration strings like `"250ms"`, `"3s"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
