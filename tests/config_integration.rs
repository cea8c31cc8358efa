use std::env;
use std::io::Write;

use gated_agents::config::{AppConfig, LogFormat};
use serial_test::serial;

const VARS: &[&str] = &[
    "CONFIG_FILE",
    "PORT",
    "REVIEW_THRESHOLD",
    "MAX_ITERATIONS",
    "GATED__SERVER__PORT",
    "GATED__REMOTE__ENDPOINT",
    "GATED__QUALITY__REVIEW_THRESHOLD",
    "GATED__QUALITY__MAX_ITERATIONS",
    "GATED__ACTIONS__PUBLISH_ATTEMPTS",
    "GATED__RUN__REQUEST_TIMEOUT_MS",
    "GATED__TRIAGE__ENDPOINT",
];

fn clear_env_vars() {
    for var in VARS {
        // SAFETY: tests touching the environment run under #[serial].
        unsafe { env::remove_var(var) };
    }
}

fn set(var: &str, value: &str) {
    // SAFETY: tests touching the environment run under #[serial].
    unsafe { env::set_var(var, value) };
}

fn load(args: &[&str]) -> Result<AppConfig, config::ConfigError> {
    AppConfig::load_from_args(std::iter::once("gated-agents").chain(args.iter().copied()))
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn defaults_apply_without_any_source() {
    clear_env_vars();

    let config = load(&[]).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.quality.review_threshold, 70);
    assert_eq!(config.quality.max_iterations, 3);
    assert_eq!(config.run.max_polls, 120);
    assert_eq!(config.run.poll_interval_ms, 1000);
    assert_eq!(config.run.request_timeout_ms, 30_000);
    assert!(config.triage.endpoint.is_none());
    assert_eq!(config.actions.publish_attempts, 2);
    assert_eq!(config.context.window_days, 30);
    assert_eq!(config.context.lang, "en");
    assert_eq!(config.safety.api_version, "2023-10-01");
    assert_eq!(config.remote.model, "gpt-4o-mini");
    assert_eq!(config.log.format, LogFormat::Pretty);
    assert!(config.remote_settings().is_none());
}

#[test]
#[serial]
fn file_then_env_then_cli() {
    clear_env_vars();
    let file = yaml_file(
        r"
server:
  port: 7070
quality:
  review_threshold: 50
  max_iterations: 5
remote:
  endpoint: https://runs.example.test
log:
  format: json
",
    );
    let path = file.path().to_str().unwrap();

    let config = load(&["--config", path]).unwrap();
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.quality.review_threshold, 50);
    assert_eq!(config.log.format, LogFormat::Json);
    assert_eq!(config.remote_settings().unwrap().endpoint, "https://runs.example.test");

    set("GATED__SERVER__PORT", "9090");
    set("GATED__QUALITY__REVIEW_THRESHOLD", "60");
    let config = load(&["--config", path]).unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.quality.review_threshold, 60);

    let config = load(&["--config", path, "--port", "6060", "--review-threshold", "80"]).unwrap();
    assert_eq!(config.server.port, 6060);
    assert_eq!(config.quality.review_threshold, 80);
    assert_eq!(config.quality.max_iterations, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn config_file_from_env() {
    clear_env_vars();
    let file = yaml_file("run:\n  max_polls: 7\n");
    set("CONFIG_FILE", file.path().to_str().unwrap());

    let config = load(&[]).unwrap();
    assert_eq!(config.run.max_polls, 7);

    clear_env_vars();
}

#[test]
#[serial]
fn request_timeout_and_triage_endpoint_from_env() {
    clear_env_vars();
    set("GATED__RUN__REQUEST_TIMEOUT_MS", "1500");
    set("GATED__TRIAGE__ENDPOINT", "https://functions.example.test");

    let config = load(&[]).unwrap();
    assert_eq!(config.run_settings().request_timeout.as_millis(), 1500);
    assert_eq!(config.triage.endpoint.as_deref(), Some("https://functions.example.test"));

    clear_env_vars();
}

#[test]
#[serial]
fn legacy_flat_variables_override_prefixed_ones() {
    clear_env_vars();
    set("GATED__QUALITY__MAX_ITERATIONS", "4");
    set("REVIEW_THRESHOLD", "85");
    set("MAX_ITERATIONS", "2");

    let config = load(&[]).unwrap();
    assert_eq!(config.quality.review_threshold, 85);
    assert_eq!(config.quality.max_iterations, 2);

    let config = load(&["--max-iterations", "6"]).unwrap();
    assert_eq!(config.quality.max_iterations, 6);

    clear_env_vars();
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    clear_env_vars();

    set("MAX_ITERATIONS", "0");
    assert!(load(&[]).is_err());
    clear_env_vars();

    set("REVIEW_THRESHOLD", "not-a-number");
    assert!(load(&[]).is_err());
    clear_env_vars();

    set("GATED__ACTIONS__PUBLISH_ATTEMPTS", "0");
    assert!(load(&[]).is_err());
    clear_env_vars();

    set("GATED__RUN__REQUEST_TIMEOUT_MS", "0");
    assert!(load(&[]).is_err());
    clear_env_vars();

    assert!(load(&["--review-threshold", "101"]).is_err());
    assert!(load(&["--bogus-flag"]).is_err());
}
