// ABOUTME: Behavioral tests for per-user containers through the pool manager
// Covers port uniqueness, reuse, eviction teardown, port recycling, orphan sweep and shutdown

use std::sync::Arc;

use futures_util::future::join_all;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mcp_gateway::docker::McpContainerSpec;
use mcp_gateway::mcp::ToolArguments;
use mcp_gateway::mcp_pool::{FailureKind, HandleKind, PoolManager, ProvisionError, UserId};

use crate::fixtures::{container_config, FakeRuntime};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

#[tokio::test]
async fn test_each_user_gets_own_container_and_port() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    let manager = Arc::new(
        PoolManager::containers(runtime.clone(), container_config(3, &data_root))
            .await
            .unwrap(),
    );

    let pings = ["alice", "bob", "carol"].map(|name| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.ping(&user(name), &CancellationToken::new()).await })
    });
    for result in join_all(pings).await {
        result.unwrap().unwrap();
    }

    let ports = runtime.ports();
    assert_eq!(ports.len(), 3);
    assert!(ports.windows(2).all(|w| w[0] != w[1]), "ports must be unique: {ports:?}");
    assert_eq!(
        runtime.names(),
        vec![
            "xiaohongshu-mcp-alice".to_string(),
            "xiaohongshu-mcp-bob".to_string(),
            "xiaohongshu-mcp-carol".to_string(),
        ]
    );
    for name in ["alice", "bob", "carol"] {
        assert!(data_root.path().join("mcp").join(name).is_dir());
    }

    manager.shutdown().await;
    assert_eq!(runtime.live(), 0);
}

#[tokio::test]
async fn test_calls_reach_the_users_own_container() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    let manager = PoolManager::containers(runtime.clone(), container_config(2, &data_root))
        .await
        .unwrap();
    let alice = user("alice");

    let result = manager
        .call_tool(&alice, "whoami", ToolArguments::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        result["content"][0]["text"].as_str(),
        Some("backend=xiaohongshu-mcp-alice user=-")
    );

    // Second call reuses the container
    let handle = manager.acquire(&alice).await.unwrap();
    assert_eq!(handle.kind(), HandleKind::ContainerInstance);
    assert_eq!(handle.backing().port, runtime.ports()[0]);
    assert_eq!(runtime.created(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_eviction_tears_down_container_and_recycles_port() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    // One slot, one port
    let manager = PoolManager::containers(runtime.clone(), container_config(1, &data_root))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    manager.ping(&user("alice"), &cancel).await.unwrap();
    let port = runtime.ports()[0];

    manager.ping(&user("bob"), &cancel).await.unwrap();

    assert_eq!(runtime.names(), vec!["xiaohongshu-mcp-bob".to_string()]);
    assert_eq!(runtime.ports(), vec![port]);
    assert_eq!(runtime.removed(), 1);
    assert_eq!(manager.metrics().evictions, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_release_removes_container() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    let manager = PoolManager::containers(runtime.clone(), container_config(2, &data_root))
        .await
        .unwrap();
    let alice = user("alice");

    manager.acquire(&alice).await.unwrap();
    assert_eq!(runtime.live(), 1);

    assert!(manager.release(&alice).await);
    assert_eq!(runtime.live(), 0);
    assert!(!manager.release(&alice).await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_orphans_swept_on_start() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    let mut config = container_config(2, &data_root);

    let leftover = McpContainerSpec::for_user(&config, "ghost", config.base_port, data_root.path().join("ghost"));
    runtime.seed(leftover);
    let mut foreign = McpContainerSpec::for_user(&config, "other", config.base_port, data_root.path().join("other"));
    foreign.labels.insert(
        mcp_gateway::docker::SERVICE_LABEL.to_string(),
        "some-other-service".to_string(),
    );
    foreign.name = "some-other-service-other".to_string();
    runtime.seed(foreign);

    config.sweep_orphans_on_start = true;
    let manager = PoolManager::containers(runtime.clone(), config).await.unwrap();

    assert_eq!(runtime.names(), vec!["some-other-service-other".to_string()]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_ports_report_service_unavailable() {
    let data_root = TempDir::new().unwrap();
    let runtime = FakeRuntime::new();
    let mut config = container_config(1, &data_root);
    // More slots than ports: the second user cannot be placed while the first holds the only port
    config.max_containers = 2;
    let manager = PoolManager::containers(runtime.clone(), config).await.unwrap();
    let cancel = CancellationToken::new();

    manager.ping(&user("alice"), &cancel).await.unwrap();
    let err = manager.ping(&user("bob"), &cancel).await.unwrap_err();

    assert_eq!(err.failure_kind(), FailureKind::ServiceUnavailable);
    assert!(matches!(
        err,
        mcp_gateway::mcp_pool::GatewayError::Provision(ProvisionError::PortsExhausted(_))
    ));
    assert_eq!(runtime.live(), 1);
    manager.shutdown().await;
}
