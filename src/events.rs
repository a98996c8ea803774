//! Event Handlers (spec §4.2): maps each decoded event object onto
//! [`MirrorState`] mutations, delegating task normalization to
//! [`crate::normalize`].

use crate::mirror::state::MirrorState;
use crate::normalize::normalize_task;
use dns_mirror_proto::{MirrorMessage, TaskId};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::warn;

/// What applying one decoded event produced.
#[derive(Debug, Default)]
pub struct EventOutcome {
    pub messages: Vec<MirrorMessage>,
    /// Set only by SUBSCRIBED: `heartbeat_interval_seconds * 1000`, used by
    /// the caller to (re)arm the watchdog at 3x this value.
    pub heartbeat_interval: Option<Duration>,
    pub is_subscribed: bool,
}

/// Applies one decoded event to `state`. Unknown kinds are logged and
/// ignored, matching spec §4.2's closing line.
///
/// Async because `AGENT_ADDED` processing resolves the agent's hostname
/// (spec §5 lists this as a suspension point: it must yield the actor,
/// not block its single worker thread).
pub async fn apply_event(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    let Some(kind) = raw.get("type").and_then(Value::as_str) else {
        warn!("event missing 'type' field, ignored");
        return EventOutcome::default();
    };

    match kind {
        "SUBSCRIBED" => apply_subscribed(state, raw).await,
        "HEARTBEAT" => apply_heartbeat(raw),
        "TASK_ADDED" | "TASK_UPDATED" => apply_task_event(state, raw),
        "FRAMEWORK_ADDED" | "FRAMEWORK_UPDATED" => apply_framework_upsert(state, raw),
        "FRAMEWORK_REMOVED" => apply_framework_removed(state, raw),
        "AGENT_ADDED" => apply_agent_added(state, raw).await,
        "AGENT_REMOVED" => apply_agent_removed(state, raw),
        other => {
            warn!(kind = other, "unrecognized event kind, ignored");
            EventOutcome::default()
        }
    }
}

async fn apply_subscribed(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    let snapshot = raw.get("subscribe").unwrap_or(raw);

    state.recovered_agents.clear();
    if let Some(ids) = snapshot.get("recovered_agents").and_then(Value::as_array) {
        for a in ids {
            if let Some(id) = agent_id_of(a) {
                state.recovered_agents.insert(id);
            }
        }
    }

    if let Some(agents) = snapshot.get("agents").and_then(Value::as_array) {
        for a in agents {
            apply_agent_added(state, a).await;
        }
    }
    if let Some(fws) = snapshot.get("frameworks").and_then(Value::as_array) {
        for f in fws {
            apply_framework_upsert(state, f);
        }
    }

    let mut messages = Vec::new();
    if let Some(tasks) = snapshot.get("tasks").and_then(Value::as_array) {
        for t in tasks {
            let outcome = apply_task_event(state, t);
            messages.extend(outcome.messages);
        }
    }

    let heartbeat_interval = snapshot
        .get("heartbeat_interval_seconds")
        .and_then(Value::as_f64)
        .map(|secs| Duration::from_millis((secs * 1000.0) as u64));

    EventOutcome {
        messages,
        heartbeat_interval,
        is_subscribed: true,
    }
}

fn apply_heartbeat(_raw: &Value) -> EventOutcome {
    EventOutcome::default()
}

fn apply_task_event(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    let Some(task_obj) = raw.get("status").or_else(|| raw.get("task")).or(Some(raw)) else {
        return EventOutcome::default();
    };
    let Some(framework_id) = task_obj
        .get("framework_id")
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
    else {
        warn!("task event missing framework_id, ignored");
        return EventOutcome::default();
    };
    let Some(raw_id) = task_obj.get("task_id").and_then(|v| v.get("value")).and_then(Value::as_str) else {
        warn!("task event missing task_id, ignored");
        return EventOutcome::default();
    };

    let id = TaskId::new(framework_id, raw_id);
    let prior = state.tasks.get(&id);
    let event_state_override = raw.get("state").and_then(Value::as_str);
    let normalized = normalize_task(task_obj, prior, &state.agents, &state.frameworks, event_state_override);

    let mut messages = Vec::new();
    if let Some(m) = state.ingest_task(id, normalized) {
        messages.push(m);
    }
    EventOutcome { messages, ..Default::default() }
}

fn apply_framework_upsert(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    let framework = raw.get("framework").unwrap_or(raw);
    let Some(id) = framework
        .get("FrameworkInfo")
        .and_then(|fi| fi.get("id"))
        .or_else(|| framework.get("id"))
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
    else {
        warn!("framework event missing id, ignored");
        return EventOutcome::default();
    };
    let name = framework
        .get("FrameworkInfo")
        .and_then(|fi| fi.get("name"))
        .or_else(|| framework.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(id)
        .to_owned();

    EventOutcome {
        messages: state.framework_added_updated(id.to_owned(), name),
        ..Default::default()
    }
}

fn apply_framework_removed(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    if let Some(id) = raw
        .get("framework_id")
        .and_then(|v| v.get("value"))
        .and_then(Value::as_str)
    {
        state.framework_removed(id);
    }
    EventOutcome::default()
}

fn agent_id_of(raw: &Value) -> Option<String> {
    raw.get("agent_info")
        .and_then(|ai| ai.get("id"))
        .or_else(|| raw.get("id"))
        .and_then(|v| v.get("value").or(Some(v)))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

async fn apply_agent_added(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    let agent = raw.get("agent").unwrap_or(raw);
    let Some(id) = agent_id_of(agent) else {
        warn!("agent event missing id, ignored");
        return EventOutcome::default();
    };
    let hostname = agent
        .get("agent_info")
        .and_then(|ai| ai.get("hostname"))
        .or_else(|| agent.get("hostname"))
        .and_then(Value::as_str);

    let Some(hostname) = hostname else {
        warn!(agent = id, "agent has no hostname, ip left unset");
        return EventOutcome::default();
    };

    match resolve_first_ipv4(hostname).await {
        Some(ip) => EventOutcome {
            messages: state.agent_added(id, ip),
            ..Default::default()
        },
        None => {
            warn!(agent = id, hostname, "hostname resolution failed, agent tracked without ip");
            EventOutcome::default()
        }
    }
}

fn apply_agent_removed(state: &mut MirrorState, raw: &Value) -> EventOutcome {
    if let Some(id) = agent_id_of(raw.get("agent_id").unwrap_or(raw)) {
        state.agent_removed(&id);
    }
    EventOutcome::default()
}

/// Resolves the first successfully-resolved IPv4 address of `hostname`;
/// extra addresses are discarded per spec §3's Agent data model. Goes
/// through the async resolver rather than `std::net::ToSocketAddrs` so a
/// slow/hanging lookup suspends this task instead of blocking the
/// executor thread it runs on.
async fn resolve_first_ipv4(hostname: &str) -> Option<Ipv4Addr> {
    tokio::net::lookup_host((hostname, 0))
        .await
        .ok()?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
}
