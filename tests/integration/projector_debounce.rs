//! S5 end to end: 100 task updates arrive within 200ms of each other on a
//! live Mirror→Projector pipeline; with push_zone_timeout=1000ms exactly
//! two zone pushes should reach the sink.

use dns_mirror::config::MirrorConfig;
use dns_mirror::metrics::Metrics;
use dns_mirror::mirror;
use dns_mirror::projector::{Projector, ProjectorConfig};
use dns_mirror::sink::LoggingZoneSink;
use dns_mirror_test_support::MockOperatorServer;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn test_config(master_url: String) -> MirrorConfig {
    MirrorConfig {
        master_url,
        reconnect_timeout: Duration::from_millis(20),
        reconnect_max_timeout: Duration::from_millis(100),
        agents_readiness_timeout: Duration::from_millis(100),
        tasks_readiness_timeout: Duration::from_millis(10),
        masters_timeout: Duration::from_secs(3600),
        push_zone_timeout: Duration::from_millis(1000),
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
async fn hundred_updates_in_200ms_yield_exactly_two_pushes() {
    let server = MockOperatorServer::start().await.unwrap();
    let metrics = Arc::new(Metrics::default());
    let handle = mirror::spawn(test_config(server.base_url()), metrics);

    wait_for_client(&server).await;
    let sub = handle.subscribe("projector").await.unwrap();

    let sink = Arc::new(LoggingZoneSink::new());
    let projector = Projector::new(
        ProjectorConfig {
            zone: "dcos.thisdcos.directory".to_owned(),
            leader_ip: Ipv4Addr::new(10, 0, 0, 254),
            resolvers: Vec::new(),
            push_zone_timeout: Duration::from_millis(1000),
            masters_timeout: Duration::from_secs(3600),
        },
        sink.clone(),
    );
    let projector_task = tokio::spawn(projector.run(sub));

    server
        .send_frame(serde_json::json!({
            "type": "SUBSCRIBED",
            "subscribe": {
                "heartbeat_interval_seconds": 15,
                "recovered_agents": [],
                "agents": [{"agent_info": {"id": {"value": "a1"}, "hostname": "127.0.0.1"}}],
                "frameworks": [{"id": {"value": "f1"}, "name": "marathon"}],
                "tasks": []
            }
        }))
        .await;

    // wait for await_tasks' short timer to elapse so we're in serve
    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 0..100u32 {
        server
            .send_frame(serde_json::json!({
                "type": "TASK_UPDATED",
                "state": "TASK_RUNNING",
                "task": {
                    "name": "web",
                    "task_id": {"value": format!("t{i}")},
                    "agent_id": {"value": "a1"},
                    "framework_id": {"value": "f1"},
                    "statuses": [{
                        "timestamp": 1.0,
                        "container_status": {
                            "network_infos": [{"ip_addresses": [{"ip_address": "10.0.0.1"}]}]
                        }
                    }]
                }
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    tokio::time::sleep(Duration::from_millis(1500)).await;
    projector_task.abort();

    // One immediate push on the first update, one final push once the
    // debounce window elapses; the other 98 updates land inside the window.
    assert_eq!(sink.assign_count(), 2);
    let latest = sink.latest().expect("at least one push happened");
    assert!(!latest.1.is_empty());
}
