//! Drives the Mirror's connection lifecycle against a mock operator stream:
//! a 307 redirect is retried silently, a SUBSCRIBED snapshot with empty
//! `recovered_agents` fast-tracks straight to `await_tasks`, and losing the
//! connection publishes `eos` before the actor reconnects.

use dns_mirror::config::MirrorConfig;
use dns_mirror::metrics::Metrics;
use dns_mirror::mirror;
use dns_mirror_proto::MirrorMessage;
use dns_mirror_test_support::MockOperatorServer;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn test_config(master_url: String) -> MirrorConfig {
    MirrorConfig {
        master_url,
        reconnect_timeout: Duration::from_millis(20),
        reconnect_max_timeout: Duration::from_millis(100),
        agents_readiness_timeout: Duration::from_millis(200),
        tasks_readiness_timeout: Duration::from_millis(50),
        masters_timeout: Duration::from_secs(3600),
        push_zone_timeout: Duration::from_millis(50),
        resolvers: Vec::new(),
        zone: "dcos.thisdcos.directory".to_owned(),
        leader_ip: Ipv4Addr::new(10, 0, 0, 254),
    }
}

async fn wait_for_client(server: &MockOperatorServer) {
    for _ in 0..200 {
        if server.has_client().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mock operator server never saw a client connect");
}

#[tokio::test]
async fn redirect_is_retried_silently_then_streams() {
    let server = MockOperatorServer::start().await.unwrap();
    server.redirect_next_connection();

    let metrics = Arc::new(Metrics::default());
    let handle = mirror::spawn(test_config(server.base_url()), metrics);
    assert!(!handle.is_leader());

    // first connection gets redirected; the retry should succeed
    wait_for_client(&server).await;
    assert!(handle.is_leader());
}

#[tokio::test]
async fn empty_recovered_agents_fast_tracks_to_serve() {
    let server = MockOperatorServer::start().await.unwrap();
    let metrics = Arc::new(Metrics::default());
    let handle = mirror::spawn(test_config(server.base_url()), metrics);

    wait_for_client(&server).await;
    let mut sub = handle.subscribe("watcher").await.unwrap();

    server
        .send_frame(serde_json::json!({
            "type": "SUBSCRIBED",
            "subscribe": {
                "heartbeat_interval_seconds": 15,
                "recovered_agents": [],
                "agents": [],
                "frameworks": [],
                "tasks": []
            }
        }))
        .await;

    let msg = tokio::time::timeout(Duration::from_millis(500), sub.next())
        .await
        .expect("full snapshot should arrive once await_tasks' short timer elapses")
        .unwrap();
    assert!(matches!(msg, MirrorMessage::Tasks(tasks) if tasks.is_empty()));
}

#[tokio::test]
async fn dropped_connection_publishes_eos_and_reconnects() {
    let server = MockOperatorServer::start().await.unwrap();
    let metrics = Arc::new(Metrics::default());
    let handle = mirror::spawn(test_config(server.base_url()), metrics);

    wait_for_client(&server).await;
    let mut sub = handle.subscribe("watcher").await.unwrap();

    server.drop_connection().await;
    let msg = tokio::time::timeout(Duration::from_millis(500), sub.next())
        .await
        .expect("eos should be published on transport death")
        .unwrap();
    assert!(matches!(msg, MirrorMessage::Eos));

    // the actor should re-establish a connection after backoff
    wait_for_client(&server).await;
}
