//! Pool configuration loading from TOML files.

use actor_mesh::{PoolConfig, WorkerPool};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
workers = 3
log_level = "debug"

[runtime]
receive_timeout_ms = 1500
join_timeout_ms = 4000
poll_interval_ms = 10
"#,
    );

    let config = PoolConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.workers, 3);
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.runtime.receive_timeout_ms, Some(1500));
    assert_eq!(config.runtime.join_timeout_ms, Some(4000));
    assert_eq!(config.runtime.poll_interval_ms, 10);

    let pool = WorkerPool::from_config(config).unwrap();
    assert_eq!(pool.map(|x: u16| x + 1, vec![1, 2, 3]).unwrap(), vec![2, 3, 4]);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config("workers = 2\n");

    let config = PoolConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.workers, 2);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.runtime.receive_timeout_ms, None);
    assert_eq!(config.runtime.poll_interval_ms, 25);
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config("workers = 0\n");
    let err = PoolConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("worker count must be positive"));

    let file = write_config("[runtime]\npoll_interval_ms = 0\n");
    assert!(PoolConfig::load(Some(file.path())).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(PoolConfig::load(Some(&missing)).is_err());
}
