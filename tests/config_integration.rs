use claims_realtime::config::{AppConfig, RegistryBackend, StoreProvider};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

const BIN: &str = "claims-realtime";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("CLAIMS_SERVER__PORT");
        env::remove_var("CLAIMS_REGISTRY__BACKEND");
        env::remove_var("CLAIMS_DELIVERY__SEND_TIMEOUT_MS");
        env::remove_var("CONFIG_FILE");
        env::remove_var("PORT");
        env::remove_var("DATABASE_URL");
        env::remove_var("REDIS_URL");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("defaults should load");
    assert_eq!(config.server.port, 8001);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.store.provider, StoreProvider::Memory);
    assert_eq!(config.store.database_url, None);
    assert_eq!(config.registry.backend, RegistryBackend::Memory);
    assert_eq!(config.registry.channel, "claims:rooms");
    assert_eq!(config.delivery.send_timeout(), Duration::from_secs(2));
    assert_eq!(config.delivery.heartbeat_interval(), Duration::from_secs(30));
    assert!(!config.telemetry.json);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CLAIMS_SERVER__PORT", "9090");
        env::set_var("CLAIMS_REGISTRY__BACKEND", "redis");
        env::set_var("CLAIMS_DELIVERY__SEND_TIMEOUT_MS", "250");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.registry.backend, RegistryBackend::Redis);
    assert_eq!(config.delivery.send_timeout(), Duration::from_millis(250));

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CLAIMS_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        BIN,
        "--port",
        "7171",
        "--store-provider",
        "postgres",
        "--database-url",
        "postgres://portal@localhost/portal",
    ])
    .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);
    assert_eq!(config.store.provider, StoreProvider::Postgres);
    assert_eq!(
        config.store.database_url.as_deref(),
        Some("postgres://portal@localhost/portal")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_plain_env_vars_bound_by_cli() {
    clear_env_vars();
    unsafe {
        env::set_var("PORT", "6161");
        env::set_var("REDIS_URL", "redis://cache:6379");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 6161);
    assert_eq!(config.registry.redis_url.as_deref(), Some("redis://cache:6379"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let config_content = r#"
server:
  port: 7070
registry:
  max_sessions_per_room: 4
delivery:
  idle_timeout_secs: 15
telemetry:
  json: true
    "#;

    let file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    fs::write(file.path(), config_content).expect("Failed to write temp config");

    // Tell AppConfig to use this file via Env Var (mocking CLI arg indirectly)
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.registry.max_sessions_per_room, 4);
    assert_eq!(config.delivery.idle_timeout(), Duration::from_secs(15));
    assert!(config.telemetry.json);
    // Untouched keys keep their defaults
    assert_eq!(config.registry.max_sessions, 100_000);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    clear_env_vars();

    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/claims.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_invalid_backend_rejected() {
    clear_env_vars();

    let result = AppConfig::load_from_args([BIN, "--registry-backend", "zookeeper"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("config.yaml"), "server:\n  port: 6060\n")
        .expect("Failed to write config.yaml");

    let previous = env::current_dir().expect("cwd");
    env::set_current_dir(dir.path()).expect("chdir");
    let config = AppConfig::load_from_args([BIN]);
    env::set_current_dir(previous).expect("restore cwd");

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}
