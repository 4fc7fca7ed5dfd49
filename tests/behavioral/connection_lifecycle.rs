// ABOUTME: Behavioral tests for per-user logical connections through the pool manager
// Covers header routing, reuse, LRU eviction, release, reaping and shutdown

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mcp_gateway::mcp::ToolArguments;
use mcp_gateway::mcp_pool::{
    ConnectionProvisioner, FailureKind, HandleKind, HandleStatus, PoolManager, ProvisionError, ReapSettings,
    UserId,
};

use crate::fixtures::{connection_config, mcp_server};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn whoami_text(result: &Value) -> String {
    result["content"][0]["text"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_calls_carry_the_user_header() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 4));
    let cancel = CancellationToken::new();

    let alice = manager
        .call_tool(&user("alice"), "whoami", ToolArguments::new(), &cancel)
        .await
        .unwrap();
    let bob = manager
        .call_tool(&user("bob"), "whoami", ToolArguments::new(), &cancel)
        .await
        .unwrap();

    assert_eq!(whoami_text(&alice), "backend=shared user=alice");
    assert_eq!(whoami_text(&bob), "backend=shared user=bob");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_repeated_acquire_reuses_handle() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 4));
    let alice = user("alice");

    let first = manager.acquire(&alice).await.unwrap();
    let tools = manager.list_tools(&alice, &CancellationToken::new()).await.unwrap();
    let second = manager.acquire(&alice).await.unwrap();

    assert_eq!(tools.len(), 1);
    assert_eq!(first.id(), second.id());
    assert_eq!(first.kind(), HandleKind::LogicalConnection);

    let metrics = manager.metrics();
    assert_eq!(metrics.provisions, 1);
    assert_eq!(metrics.reuse_hits, 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 2));
    let cancel = CancellationToken::new();
    let (a, b, c) = (user("a"), user("b"), user("c"));

    manager.ping(&a, &cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    manager.ping(&b, &cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Touch A so B becomes the oldest
    manager.ping(&a, &cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    manager.ping(&c, &cancel).await.unwrap();

    let residents: Vec<String> = manager
        .snapshot()
        .await
        .into_iter()
        .map(|h| h.user_id.to_string())
        .collect();
    assert_eq!(residents.len(), 2);
    assert!(residents.contains(&"a".to_string()));
    assert!(residents.contains(&"c".to_string()));
    assert_eq!(manager.metrics().evictions, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_unknown_tool_fails_request_but_keeps_connection() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 2));
    let alice = user("alice");
    let cancel = CancellationToken::new();

    let err = manager
        .call_tool(&alice, "does_not_exist", ToolArguments::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::RequestFailed);

    let stats = manager.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.error, 1);

    // Next success flips the status back
    manager.ping(&alice, &cancel).await.unwrap();
    assert_eq!(manager.acquire(&alice).await.unwrap().status(), HandleStatus::Active);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 2));
    let alice = user("alice");

    let before = manager.acquire(&alice).await.unwrap().id();
    assert!(manager.release(&alice).await);
    assert!(!manager.release(&alice).await);
    assert!(!manager.release(&user("never-seen")).await);

    let after = manager.acquire(&alice).await.unwrap().id();
    assert_ne!(before, after);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_users_never_exceed_capacity() {
    let server = mcp_server().await;
    let manager = Arc::new(PoolManager::connections(&connection_config(&server, 3)));

    let calls = (0..20).map(|i| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let user = user(&format!("user-{}", i % 7));
            manager.ping(&user, &CancellationToken::new()).await
        })
    });
    for result in futures_util::future::join_all(calls).await {
        result.unwrap().unwrap();
    }

    let stats = manager.stats().await;
    assert!(stats.total <= 3, "resident {} exceeds capacity", stats.total);
    assert_eq!(stats.capacity, 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_reaper_removes_idle_connections() {
    let server = mcp_server().await;
    let manager = PoolManager::new(
        ConnectionProvisioner::new(&connection_config(&server, 4)),
        4,
        ReapSettings {
            enabled: true,
            interval: Duration::from_millis(50),
            idle_threshold: Duration::from_millis(150),
        },
    );
    manager.start().await;
    manager.ping(&user("idle"), &CancellationToken::new()).await.unwrap();
    assert_eq!(manager.stats().await.total, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(manager.stats().await.total, 0);
    assert_eq!(manager.metrics().reaped, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let server = mcp_server().await;
    let manager = PoolManager::connections(&connection_config(&server, 2));
    manager.ping(&user("alice"), &CancellationToken::new()).await.unwrap();

    manager.shutdown().await;

    assert_eq!(manager.stats().await.total, 0);
    let err = manager
        .ping(&user("alice"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::ServiceUnavailable);
    assert!(matches!(
        manager.acquire(&user("bob")).await,
        Err(ProvisionError::ShuttingDown)
    ));
}
