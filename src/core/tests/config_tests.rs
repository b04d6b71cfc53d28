//! Integration tests for configuration loading.

use jobrank_core::config::{Config, PriorityConfig, SchedulerConfig};
use jobrank_core::prelude::*;
use jobrank_core::telemetry::LogFormat;
use std::io::Write;
use std::time::Duration;

const SAMPLE: &str = r#"
[scheduler]
workers = 3
default_aging = "2s"
sweep_interval = "250ms"

[[scheduler.priorities]]
name = "Urgent"
rank = 0

[[scheduler.priorities]]
name = "Necessary"
rank = 10
aging = "500ms"

[[scheduler.priorities]]
name = "Background"
rank = 100
aging = "0s"

[telemetry]
service_name = "jobrank-test"

[telemetry.logging]
level = "debug"
format = "json"

[telemetry.metrics]
enabled = false
"#;

// ============================================================================
// Parsing Tests
// ============================================================================

#[test]
fn test_parse_toml() {
    let config = Config::from_toml_str(SAMPLE).unwrap();

    assert_eq!(config.scheduler.workers, 3);
    assert_eq!(config.scheduler.default_aging, Some(Duration::from_secs(2)));
    assert_eq!(config.scheduler.sweep_interval, Some(Duration::from_millis(250)));
    assert_eq!(
        config.scheduler.priorities[1],
        PriorityConfig::new("Necessary", 10).with_aging(Duration::from_millis(500))
    );
    assert_eq!(config.scheduler.priorities[2].aging, Some(Duration::ZERO));

    assert_eq!(config.telemetry.service_name, "jobrank-test");
    assert_eq!(config.telemetry.logging.level, "debug");
    assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    assert!(!config.telemetry.metrics.enabled);
}

#[test]
fn test_empty_document_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.scheduler.workers, 1);
    assert_eq!(config.scheduler.priorities.len(), 3);
    assert_eq!(config.telemetry.service_name, "jobrank");
}

#[test]
fn test_invalid_duration_rejected() {
    let err = Config::from_toml_str("[scheduler]\ndefault_aging = \"soon\"\n").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

#[test]
fn test_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.workers, 3);
}

#[test]
fn test_load_with_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.scheduler.priorities.len(), 3);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

#[test]
fn test_toml_output_parses_back() {
    let config = Config::from_toml_str(SAMPLE).unwrap();
    let rendered = config.to_toml_string().unwrap();
    let reparsed = Config::from_toml_str(&rendered).unwrap();

    assert_eq!(reparsed.scheduler.priorities, config.scheduler.priorities);
    assert_eq!(reparsed.scheduler.sweep_interval, config.scheduler.sweep_interval);
}

// ============================================================================
// Build Tests
// ============================================================================

#[test]
fn test_build_registers_priorities() {
    let config = Config::from_toml_str(SAMPLE).unwrap();
    let scheduler = config.scheduler.build().unwrap();

    let levels = scheduler.priorities();
    let names: Vec<_> = levels.iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, ["Urgent", "Necessary", "Background"]);
    assert_eq!(levels[2].aging_policy(), Aging::Disabled);
}

#[test]
fn test_build_rejects_duplicate_ranks() {
    let config = SchedulerConfig {
        priorities: vec![PriorityConfig::new("A", 1), PriorityConfig::new("B", 1)],
        ..Default::default()
    };
    let err = config.build().unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicatePriority);
}

#[test]
fn test_build_rejects_zero_workers() {
    let config = Config::from_toml_str("[scheduler]\nworkers = 0\n").unwrap();
    let err = config.scheduler.build().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

#[tokio::test(start_paused = true)]
async fn test_no_promotion_without_running_workers() {
    let config = Config::from_toml_str(SAMPLE).unwrap();
    let scheduler = config.scheduler.build().unwrap();

    let necessary = config.scheduler.priority_named("Necessary").unwrap();
    let job = Job::new(|_| async { JobResult::empty() });
    scheduler.schedule(&necessary, job.clone()).unwrap();

    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    scheduler
        .set_completion_hook(move |done| sink.lock().push(done.promotions))
        .unwrap();

    // The sweeper only runs alongside workers.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let token = CancelToken::with_timeout(Duration::from_millis(10));
    let _ = scheduler.run_one(&token).await;

    assert!(job.is_completed());
    assert_eq!(*seen.lock(), [0]);
}
