//! Configuration layering tests: defaults, global file, project file, environment.
//!
//! Tests touching `COMPANION_*` variables are `#[serial]` since the process
//! environment is shared.

// Integration tests have relaxed clippy settings for test ergonomics.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::uninlined_format_args,
    clippy::doc_markdown
)]

use std::path::PathBuf;

use companion_core::{config::load_config_from, Error};
use serial_test::serial;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "COMPANION_MANAGEMENT_URL",
    "COMPANION_USERNAME",
    "COMPANION_PASSWORD",
    "COMPANION_VHOST",
    "COMPANION_TIMEOUT_SECS",
    "COMPANION_STATUS_INTERVAL",
    "COMPANION_MAX_MESSAGE_SIZE",
    "COMPANION_MAX_PUBLISHERS",
    "COMPANION_DEAD_LETTER_SUFFIXES",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
#[serial]
async fn test_missing_files_yield_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let config = load_config_from(
        Some(dir.path().join("absent-global.toml")),
        Some(dir.path().join("absent-project.toml")),
    )
    .await
    .unwrap();

    assert_eq!(config.broker.management_url, "http://localhost:15672");
    assert_eq!(config.broker.vhost, "/");
    assert_eq!(config.simulator.max_publishers, 64);
    assert_eq!(config.tracer.dead_letter_suffixes, vec![".dlq", ".dead"]);
}

/// GIVEN: a global file and a project file setting overlapping keys
/// WHEN: configuration is loaded
/// THEN: project keys win, keys absent from the project file keep the global value
#[tokio::test]
#[serial]
async fn test_project_layer_overrides_global_layer() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let global = write(
        &dir,
        "global.toml",
        r#"
[broker]
management_url = "https://rabbit.internal:15671"
username = "ops"
vhost = "prod"

[tracer]
dead_letter_suffixes = [".parking"]
"#,
    );
    let project = write(
        &dir,
        "project.toml",
        r#"
[broker]
vhost = "staging"

[simulator]
max_publishers = 8
"#,
    );

    let config = load_config_from(Some(global), Some(project)).await.unwrap();

    assert_eq!(config.broker.management_url, "https://rabbit.internal:15671");
    assert_eq!(config.broker.username, "ops");
    assert_eq!(config.broker.password, "guest");
    assert_eq!(config.broker.vhost, "staging");
    assert_eq!(config.simulator.max_publishers, 8);
    assert_eq!(config.tracer.dead_letter_suffixes, vec![".parking"]);
}

#[tokio::test]
#[serial]
async fn test_environment_overrides_files() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let project = write(&dir, "project.toml", "[broker]\nusername = \"file-user\"\n");
    std::env::set_var("COMPANION_USERNAME", "env-user");
    std::env::set_var("COMPANION_STATUS_INTERVAL", "25");
    std::env::set_var("COMPANION_DEAD_LETTER_SUFFIXES", ".dlq, .parking ,");

    let result = load_config_from(None, Some(project)).await;
    clear_env();
    let config = result.unwrap();

    assert_eq!(config.broker.username, "env-user");
    assert_eq!(config.simulator.status_interval, 25);
    assert_eq!(config.tracer.dead_letter_suffixes, vec![".dlq", ".parking"]);
}

#[tokio::test]
#[serial]
async fn test_unparseable_env_value_is_rejected() {
    clear_env();
    std::env::set_var("COMPANION_MAX_PUBLISHERS", "lots");

    let result = load_config_from(None, None).await;
    clear_env();

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
#[serial]
async fn test_unknown_key_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let project = write(&dir, "project.toml", "[broker]\nhostname = \"rabbit\"\n");

    let result = load_config_from(None, Some(project)).await;

    assert!(
        matches!(result, Err(Error::InvalidConfig(ref msg)) if msg.contains("broker.hostname")),
        "{result:?}"
    );
}

#[tokio::test]
#[serial]
async fn test_malformed_toml_is_parse_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let project = write(&dir, "project.toml", "[broker\nvhost = ");

    let result = load_config_from(None, Some(project)).await;

    assert!(matches!(result, Err(Error::ParseError(_))));
}

#[tokio::test]
#[serial]
async fn test_invalid_merged_values_fail_validation() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let bad_scheme = write(
        &dir,
        "scheme.toml",
        "[broker]\nmanagement_url = \"amqp://localhost:5672\"\n",
    );
    let zero_interval = write(&dir, "zero.toml", "[simulator]\nstatus_interval = 0\n");

    let scheme = load_config_from(None, Some(bad_scheme)).await;
    let zero = load_config_from(None, Some(zero_interval)).await;

    assert!(matches!(scheme, Err(Error::InvalidConfig(ref msg)) if msg.contains("http")));
    assert!(
        matches!(zero, Err(Error::InvalidConfig(ref msg)) if msg.contains("simulator.status_interval"))
    );
}
