// ABOUTME: Behavioral tests for configuration loading and the pools it configures
// Verifies defaults, file parsing, env overrides and that configs drive the right pool

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use mcp_gateway::config::{GatewayConfig, LogFormat};
use mcp_gateway::mcp_pool::{PoolManager, RestartPolicy};

/// Defaults match the reference deployment
#[test]
fn test_default_config_has_sensible_values() {
    let config = GatewayConfig::default();

    assert_eq!(config.connection.base_url, "http://localhost:18060/mcp");
    assert_eq!(config.connection.max_connections, 100);
    assert_eq!(config.connection.idle_threshold, Duration::from_secs(3600));

    assert_eq!(config.container.base_port, 18060);
    assert_eq!(config.container.port_range, 1000);
    assert_eq!(config.container.memory_limit_mb, 256);
    assert!((config.container.cpu_limit - 0.1).abs() < f64::EPSILON);
    assert_eq!(config.container.restart_policy, RestartPolicy::OnFailure);
    assert_eq!(config.container.idle_threshold, Duration::from_secs(600));
    assert_eq!(config.logging.format, LogFormat::Text);

    config.validate().unwrap();
}

#[test]
fn test_explicit_file_with_env_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.toml");
    fs::write(
        &path,
        r#"
        [connection]
        max_connections = 5

        [container]
        image = "example/mcp:1.2"
        restart_policy = "unless-stopped"
        readiness_poll_interval = 250
        "#,
    )
    .unwrap();

    let mut config = GatewayConfig::from_file(&path).unwrap();
    config
        .apply_env(|key| (key == "MCP_GATEWAY_MAX_CONNECTIONS").then(|| "7".to_string()))
        .unwrap();
    config.validate().unwrap();

    assert_eq!(config.connection.max_connections, 7);
    assert_eq!(config.container.image, "example/mcp:1.2");
    assert_eq!(config.container.restart_policy, RestartPolicy::UnlessStopped);
    assert_eq!(config.container.readiness_poll_interval, Duration::from_millis(250));
}

#[test]
fn test_malformed_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[connection\nmax_connections = ").unwrap();

    let err = GatewayConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[tokio::test]
async fn test_connection_config_sets_pool_capacity() {
    let mut config = GatewayConfig::default();
    config.connection.max_connections = 3;
    config.connection.reaper_enabled = false;

    let manager = PoolManager::connections(&config.connection);
    let stats = manager.stats().await;

    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.total, 0);
    assert_eq!(manager.pool().provisioner().base_url(), "http://localhost:18060/mcp");
}
