//! Session isolation, event streams and graceful shutdown.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use mcp_bridge::backend::ConnectionState;
use mcp_bridge::config::SessionMode;

mod common;

use common::{eventually, next_event, rpc, start_bridge, test_config, FakeChild, NOTIFY_TOOL};

async fn open_stream(client: &reqwest::Client, url: &str, session: &str) -> reqwest::Response {
    let res = client
        .get(url)
        .header("Mcp-Session-Id", session)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res
}

#[tokio::test]
async fn per_client_streams_are_isolated() {
    let bridge = start_bridge(FakeChild::new(), test_config(SessionMode::PerClient)).await;
    let client = reqwest::Client::new();

    let mut alice = open_stream(&client, &bridge.url("/mcp"), "alice").await;
    let mut bob = open_stream(&client, &bridge.url("/mcp"), "bob").await;
    assert_eq!(bridge.registry.len(), 2);

    let res = client
        .post(bridge.url("/mcp"))
        .header("Mcp-Session-Id", "alice")
        .header("Accept", "text/event-stream")
        .json(&rpc(7, "tools/list", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.headers()["mcp-session-id"], "alice");

    let event = tokio::time::timeout(Duration::from_secs(2), next_event(&mut alice))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event["id"], json!(7));
    assert!(event["result"]["tools"].is_array());

    let nothing = tokio::time::timeout(Duration::from_millis(300), next_event(&mut bob)).await;
    assert!(nothing.is_err(), "bob received alice's response");
}

#[tokio::test]
async fn backend_notifications_reach_open_streams() {
    let bridge = start_bridge(FakeChild::new(), test_config(SessionMode::PerClient)).await;
    let client = reqwest::Client::new();
    let mut alice = open_stream(&client, &bridge.url("/mcp"), "alice").await;
    let mut bob = open_stream(&client, &bridge.url("/mcp"), "bob").await;

    let body: Value = client
        .post(bridge.url("/mcp"))
        .header("Mcp-Session-Id", "alice")
        .json(&rpc(1, "tools/call", json!({"name": NOTIFY_TOOL, "arguments": {}})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["id"], json!(1));

    for stream in [&mut alice, &mut bob] {
        let event = tokio::time::timeout(Duration::from_secs(2), next_event(stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event["method"], "notifications/message");
    }
}

#[tokio::test]
async fn closed_stream_removes_only_its_session() {
    let bridge = start_bridge(FakeChild::new(), test_config(SessionMode::PerClient)).await;
    let client = reqwest::Client::new();
    let alice = open_stream(&client, &bridge.url("/mcp"), "alice").await;
    let _bob = open_stream(&client, &bridge.url("/mcp"), "bob").await;
    drop(alice);

    // Each notification forces a write to alice's dead connection.
    let mut id = 0;
    let mut removed = false;
    for _ in 0..40 {
        id += 1;
        client
            .post(bridge.url("/mcp"))
            .header("Mcp-Session-Id", "bob")
            .json(&rpc(id, "tools/call", json!({"name": NOTIFY_TOOL, "arguments": {}})))
            .send()
            .await
            .unwrap();
        let registry = bridge.registry.clone();
        if eventually(Duration::from_millis(100), || !registry.contains("alice")).await {
            removed = true;
            break;
        }
    }

    assert!(removed, "alice's session outlived its stream");
    assert!(bridge.registry.contains("bob"));
}

#[tokio::test]
async fn per_client_mode_mints_session_ids() {
    let mut config = test_config(SessionMode::PerClient);
    config.sessions.grace_delay_ms = 5_000;
    let bridge = start_bridge(FakeChild::new(), config).await;

    let res = reqwest::Client::new()
        .post(bridge.url("/mcp"))
        .json(&rpc(1, "ping", json!({})))
        .send()
        .await
        .unwrap();
    let session = res.headers()["mcp-session-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&session).is_ok());
    assert!(bridge.registry.contains(&session));
}

#[tokio::test]
async fn stream_less_sessions_do_not_accumulate() {
    let bridge = start_bridge(FakeChild::new(), test_config(SessionMode::PerClient)).await;
    let client = reqwest::Client::new();

    for id in 0..50u64 {
        let res = client
            .post(bridge.url("/mcp"))
            .json(&rpc(id, "ping", json!({})))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client
        .post(bridge.url("/mcp"))
        .header("Mcp-Session-Id", "client-chosen")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let registry = bridge.registry.clone();
    assert!(eventually(Duration::from_secs(2), || registry.is_empty()).await);
}

#[tokio::test]
async fn shared_mode_newest_stream_wins() {
    let bridge = start_bridge(FakeChild::new(), test_config(SessionMode::Shared)).await;
    let client = reqwest::Client::new();

    let mut first = open_stream(&client, &bridge.url("/mcp"), "ignored").await;
    let mut second = open_stream(&client, &bridge.url("/mcp"), "ignored").await;

    let ended = tokio::time::timeout(Duration::from_secs(2), next_event(&mut first))
        .await
        .unwrap();
    assert!(ended.is_none(), "replaced stream kept running");

    let res = client
        .post(bridge.url("/mcp"))
        .header("Accept", "text/event-stream")
        .json(&rpc(4, "ping", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let event = tokio::time::timeout(Duration::from_secs(2), next_event(&mut second))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event["id"], json!(4));
}

#[tokio::test]
async fn shared_mode_uses_one_session() {
    let mut config = test_config(SessionMode::Shared);
    config.sessions.grace_delay_ms = 5_000;
    let bridge = start_bridge(FakeChild::new(), config).await;
    let client = reqwest::Client::new();

    for (id, session) in ["a", "b", "c"].into_iter().enumerate() {
        let res = client
            .post(bridge.url("/mcp"))
            .header("Mcp-Session-Id", session)
            .json(&rpc(id as u64, "ping", json!({})))
            .send()
            .await
            .unwrap();
        assert!(!res.headers().contains_key("mcp-session-id"));
    }
    assert_eq!(bridge.registry.len(), 1);
}

#[tokio::test]
async fn shutdown_lets_in_flight_calls_finish() {
    let child = FakeChild::with_delays(Duration::ZERO, Duration::from_millis(400));
    let bridge = start_bridge(child, test_config(SessionMode::Shared)).await;
    let client = reqwest::Client::new();

    let url = bridge.url("/mcp");
    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .post(url)
                .json(&rpc(9, "tools/call", json!({"name": "browser_navigate", "arguments": {"url": "about:blank"}})))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });

    let backend = bridge.backend().clone();
    assert!(eventually(Duration::from_secs(2), || backend.is_connected()).await);
    bridge.shutdown.trigger();

    let reply = call.await.unwrap();
    assert_eq!(reply["id"], json!(9));
    assert_eq!(reply["result"]["content"][0]["text"], "ran browser_navigate");

    tokio::time::timeout(Duration::from_secs(5), bridge.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(bridge.registry.is_empty());
    assert_eq!(backend.state(), ConnectionState::Absent);

    let err = backend.list_tools(None).await.unwrap_err();
    assert_eq!(err.to_rpc_error().code, mcp_bridge::error::SHUTDOWN_IN_PROGRESS);
}
