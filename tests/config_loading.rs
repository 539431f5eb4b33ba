// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use lockdag::config::{load_and_validate, load_or_default};
use lockdag::errors::LockdagError;
use lockdag::types::StoreKind;
use tempfile::{NamedTempFile, tempdir};

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_config_is_parsed_into_settings() {
    let file = config_file(
        r#"
[engine]
worker_pool_size = 8
max_concurrent_jobs = 2
event_buffer = 16

[lock]
acquire_timeout = "90s"
upgrade_timeout = "250ms"

[store]
kind = "sqlite"
path = "state/jobs.db"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.engine.worker_pool_size, 8);
    assert_eq!(cfg.engine.max_concurrent_jobs, 2);
    assert_eq!(cfg.engine.event_buffer, 16);
    assert_eq!(cfg.engine.lock.acquire_timeout, Duration::from_secs(90));
    assert_eq!(cfg.engine.lock.upgrade_timeout, Duration::from_millis(250));
    assert_eq!(cfg.store.kind, StoreKind::Sqlite);
    assert_eq!(cfg.store.path.to_str(), Some("state/jobs.db"));
}

#[test]
fn empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.engine.worker_pool_size, 40);
    assert_eq!(cfg.engine.max_concurrent_jobs, 10);
    assert_eq!(cfg.engine.lock.acquire_timeout, Duration::from_secs(3600));
    assert_eq!(cfg.engine.lock.upgrade_timeout, Duration::from_secs(30));
    assert_eq!(cfg.store.kind, StoreKind::Memory);
}

#[test]
fn missing_file_falls_back_to_defaults_only_when_asked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(matches!(load_and_validate(&path), Err(LockdagError::IoError(_))));
    let cfg = load_or_default(&path).unwrap();
    assert_eq!(cfg.engine.worker_pool_size, 40);
}

#[test]
fn zero_pool_size_returns_config_error() {
    let file = config_file("[engine]\nworker_pool_size = 0\n");

    match load_and_validate(file.path()) {
        Err(LockdagError::ConfigError(msg)) => assert!(msg.contains("worker_pool_size")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn bad_duration_returns_config_error() {
    let file = config_file("[lock]\nacquire_timeout = \"soon\"\n");

    match load_and_validate(file.path()) {
        Err(LockdagError::ConfigError(msg)) => assert!(msg.contains("acquire_timeout")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn unknown_store_kind_returns_toml_error() {
    let file = config_file("[store]\nkind = \"postgres\"\n");
    assert!(matches!(load_and_validate(file.path()), Err(LockdagError::TomlError(_))));
}
