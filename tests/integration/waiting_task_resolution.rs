//! S1 end to end: a task arrives referencing an agent and framework that
//! haven't been seen yet; it must stay parked in `waiting_tasks` and only
//! surface a `task_updated` once both references resolve, in whichever
//! order the resolving events arrive.

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
        agents_readiness_timeout: Duration::from_millis(100),
        tasks_readiness_timeout: Duration::from_millis(30),
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
async fn task_resolves_once_both_references_arrive_and_enters_serve() {
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
                "tasks": [{
                    "name": "web",
                    "task_id": {"value": "t1"},
                    "agent_id": {"value": "a1"},
                    "framework_id": {"value": "f1"},
                    "statuses": [{"timestamp": 1.0, "state": "TASK_RUNNING"}]
                }]
            }
        }))
        .await;

    // full snapshot on entering serve: the task is excluded since it's still waiting
    let snapshot = tokio::time::timeout(Duration::from_millis(500), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(snapshot, MirrorMessage::Tasks(tasks) if tasks.is_empty()));

    server
        .send_frame(serde_json::json!({
            "type": "AGENT_ADDED",
            "agent": {"agent_info": {"id": {"value": "a1"}, "hostname": "127.0.0.1"}}
        }))
        .await;

    server
        .send_frame(serde_json::json!({
            "type": "FRAMEWORK_ADDED",
            "framework": {"id": {"value": "f1"}, "name": "marathon"}
        }))
        .await;

    let resolved = tokio::time::timeout(Duration::from_millis(500), sub.next())
        .await
        .expect("task_updated should fire once the second reference resolves")
        .unwrap();
    match resolved {
        MirrorMessage::TaskUpdated(_, task) => assert!(!task.is_waiting()),
        other => panic!("expected TaskUpdated, got {other:?}"),
    }
}
