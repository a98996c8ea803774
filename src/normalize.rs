//! Task Normalizer (spec §4.3): derives a canonical [`Task`] from a raw
//! operator task object plus the current agent/framework tables.
//!
//! Every extractor is individually fallible; a per-field failure is logged
//! and the field retains whatever the prior [`Task`] held. Nothing here
//! panics on malformed input — a task object missing or misshaping a field
//! just yields less information, never an error the caller has to handle.

use dns_mirror_proto::{AgentId, FrameworkId, Port, Protocol, Runtime, Task, TaskState, UnresolvedRef};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Normalizes a raw task object into a [`Task`], merging onto `prior`.
///
/// `event_state_override` is the event-level `state` field for
/// `TASK_UPDATED`/`TASK_ADDED`, which takes precedence over the state
/// embedded in the latest status object per spec §4.2.
pub fn normalize_task(
    raw: &Value,
    prior: Option<&Task>,
    agents: &HashMap<AgentId, Ipv4Addr>,
    frameworks: &HashMap<FrameworkId, String>,
    event_state_override: Option<&str>,
) -> Task {
    let mut task = prior.cloned().unwrap_or_default();

    if let Some(agent_id) = extract_id(raw, "agent_id") {
        task.agent_ip = Some(match agents.get(&agent_id) {
            Some(ip) => UnresolvedRef::Resolved(*ip),
            None => UnresolvedRef::Unresolved(agent_id),
        });
    }

    if let Some(framework_id) = extract_id(raw, "framework_id") {
        task.framework = Some(match frameworks.get(&framework_id) {
            Some(name) => UnresolvedRef::Resolved(name.clone()),
            None => UnresolvedRef::Unresolved(framework_id),
        });
    }

    if let Some(name) = raw.get("name").and_then(Value::as_str) {
        task.name = Some(name.to_owned());
    }

    let latest = latest_status(raw);

    if let Some(state_str) = event_state_override.or_else(|| latest.and_then(|s| s.get("state")).and_then(Value::as_str)) {
        task.state = Some(TaskState::from_raw(state_str));
    }

    if let Some(h) = extract_healthy(raw, latest) {
        task.healthy = Some(h);
    }

    let ips = extract_task_ips(latest);
    if !ips.is_empty() {
        task.task_ip = ips;
    }

    let ports = extract_ports(raw, latest);
    if !ports.is_empty() {
        task.ports = ports;
    }

    if let Some(container_type) = raw
        .get("container")
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
    {
        task.runtime = Some(match container_type {
            "MESOS" => Runtime::Mesos,
            "DOCKER" => Runtime::Docker,
            _ => Runtime::Unknown,
        });
    }

    if should_collapse_host_ports(&task) {
        task.ports = collapse_host_ports(&task.ports);
    }

    task
}

fn extract_id(raw: &Value, field: &str) -> Option<String> {
    raw.get(field)?.get("value")?.as_str().map(str::to_owned)
}

/// `statuses` sorted by `timestamp` descending; returns the first.
fn latest_status(raw: &Value) -> Option<&Value> {
    let statuses = raw.get("statuses")?.as_array()?;
    statuses.iter().max_by(|a, b| {
        let ta = a.get("timestamp").and_then(Value::as_f64).unwrap_or(f64::MIN);
        let tb = b.get("timestamp").and_then(Value::as_f64).unwrap_or(f64::MIN);
        ta.total_cmp(&tb)
    })
}

fn extract_healthy(raw: &Value, latest: Option<&Value>) -> Option<bool> {
    if let Some(h) = latest.and_then(|s| s.get("healthy")).and_then(Value::as_bool) {
        return Some(h);
    }
    if raw.get("health_check").is_some() {
        return Some(false);
    }
    None
}

fn extract_task_ips(latest: Option<&Value>) -> Vec<IpAddr> {
    let Some(status) = latest else { return Vec::new() };
    let Some(infos) = status
        .get("container_status")
        .and_then(|cs| cs.get("network_infos"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut ips = Vec::new();
    for info in infos {
        let Some(addrs) = info.get("ip_addresses").and_then(Value::as_array) else {
            continue;
        };
        for a in addrs {
            let Some(raw_ip) = a.get("ip_address").and_then(Value::as_str) else {
                continue;
            };
            match raw_ip.parse::<IpAddr>() {
                Ok(ip) => ips.push(ip),
                Err(_) => warn!(ip = raw_ip, "task normalizer: unparseable task ip, dropped"),
            }
        }
    }
    ips
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

fn extract_ports(raw: &Value, latest: Option<&Value>) -> Vec<Port> {
    let mut ports = Vec::new();
    ports.extend(extract_port_mappings(raw, latest));
    ports.extend(extract_vip_resource_ports(raw));
    ports.extend(extract_discovery_ports(raw));
    merge_ports(ports)
}

fn extract_port_mappings(raw: &Value, latest: Option<&Value>) -> Vec<Port> {
    let container_type = raw.get("container").and_then(|c| c.get("type")).and_then(Value::as_str);

    match container_type {
        Some("MESOS") => {
            let infos = latest
                .and_then(|s| s.get("container_status"))
                .and_then(|cs| cs.get("network_infos"))
                .or_else(|| raw.get("container").and_then(|c| c.get("network_infos")))
                .and_then(Value::as_array);
            infos
                .map(|infos| {
                    infos
                        .iter()
                        .filter_map(|i| i.get("port_mappings"))
                        .filter_map(Value::as_array)
                        .flatten()
                        .filter_map(port_mapping_to_port)
                        .collect()
                })
                .unwrap_or_default()
        }
        Some("DOCKER") => raw
            .get("container")
            .and_then(|c| c.get("docker"))
            .and_then(|d| d.get("port_mappings"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(port_mapping_to_port).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn port_mapping_to_port(m: &Value) -> Option<Port> {
    let protocol = m
        .get("protocol")
        .and_then(Value::as_str)
        .and_then(Protocol::from_raw)
        .unwrap_or(Protocol::Tcp);
    let host_port = m.get("host_port").and_then(Value::as_u64).map(|v| v as u16);
    let port = m
        .get("container_port")
        .or_else(|| m.get("port"))
        .and_then(Value::as_u64)
        .map(|v| v as u16);
    if host_port.is_none() && port.is_none() {
        return None;
    }
    Some(Port {
        name: None,
        host_port,
        port,
        protocol,
        vip: BTreeSet::new(),
    })
}

/// Expands `resources[name=ports]` RANGES/SCALAR into an ordered port list,
/// then applies `vip_port<N>` labels to select entries with VIP labels.
fn extract_vip_resource_ports(raw: &Value) -> Vec<Port> {
    let Some(resources) = raw.get("resources").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut expanded: Vec<u16> = Vec::new();
    let mut vip_labels: Vec<(usize, String, String)> = Vec::new();

    for res in resources {
        if res.get("name").and_then(Value::as_str) != Some("ports") {
            continue;
        }
        match res.get("type").and_then(Value::as_str) {
            Some("RANGES") => {
                if let Some(ranges) = res
                    .get("ranges")
                    .and_then(|r| r.get("range"))
                    .and_then(Value::as_array)
                {
                    for r in ranges {
                        let begin = r.get("begin").and_then(Value::as_u64).unwrap_or(0);
                        let end = r.get("end").and_then(Value::as_u64).unwrap_or(begin);
                        for p in begin..=end {
                            expanded.push(p as u16);
                        }
                    }
                }
            }
            Some("SCALAR") => {
                if let Some(v) = res.get("scalar").and_then(|s| s.get("value")).and_then(Value::as_u64) {
                    expanded.push(v as u16);
                }
            }
            _ => {}
        }

        if let Some(labels) = res.get("reservations").and_then(Value::as_array) {
            for resv in labels {
                collect_vip_labels(resv, &mut vip_labels);
            }
        }
        collect_vip_labels(res, &mut vip_labels);
    }

    let mut out = Vec::new();
    for (idx, scheme_label) in vip_labels {
        let Some(port) = expanded.get(idx).copied() else {
            continue;
        };
        let Some((scheme, label)) = scheme_label.split_once("://") else {
            continue;
        };
        let Some(protocol) = Protocol::from_raw(scheme) else {
            continue;
        };
        out.push(Port {
            name: None,
            host_port: Some(port),
            port: None,
            protocol,
            vip: BTreeSet::from([label.to_owned()]),
        });
    }
    out
}

fn collect_vip_labels(obj: &Value, out: &mut Vec<(usize, String, String)>) {
    let Some(labels) = obj.get("labels").and_then(|l| l.get("labels")).and_then(Value::as_array) else {
        return;
    };
    for l in labels {
        let (Some(key), Some(value)) = (
            l.get("key").and_then(Value::as_str),
            l.get("value").and_then(Value::as_str),
        ) else {
            continue;
        };
        let Some(idx_str) = key.to_ascii_lowercase().strip_prefix("vip_port").map(str::to_owned) else {
            continue;
        };
        if let Ok(idx) = idx_str.parse::<usize>() {
            out.push((idx, key.to_owned(), value.to_owned()));
        }
    }
}

fn extract_discovery_ports(raw: &Value) -> Vec<Port> {
    let Some(ports) = raw
        .get("discovery")
        .and_then(|d| d.get("ports"))
        .and_then(|p| p.get("ports"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    ports
        .iter()
        .filter_map(|p| {
            let protocol = p.get("protocol").and_then(Value::as_str).and_then(Protocol::from_raw)?;
            let number = p.get("number").and_then(Value::as_u64)? as u16;
            let name = p.get("name").and_then(Value::as_str).map(str::to_owned);

            let mut vip = BTreeSet::new();
            if let Some(labels) = p.get("labels").and_then(|l| l.get("labels")).and_then(Value::as_array) {
                for l in labels {
                    let key = l.get("key").and_then(Value::as_str).unwrap_or_default();
                    if key.to_ascii_uppercase().starts_with("VIP") {
                        if let Some(v) = l.get("value").and_then(Value::as_str) {
                            vip.insert(v.to_owned());
                        }
                    }
                }
            }

            let scope = p.get("labels").and_then(|l| l.get("labels")).and_then(Value::as_array).and_then(|labels| {
                labels.iter().find_map(|l| {
                    if l.get("key").and_then(Value::as_str) == Some("network-scope") {
                        l.get("value").and_then(Value::as_str)
                    } else {
                        None
                    }
                })
            });

            let (host_port, port) = match scope {
                Some("host") => (Some(number), None),
                _ => (None, Some(number)),
            };

            Some(Port {
                name: name.or_else(|| Some("default".to_owned())),
                host_port,
                port,
                protocol,
                vip,
            })
        })
        .collect()
}

/// Merges a flat list of ports from all sources: two ports match iff same
/// protocol and same `port` or `host_port`; matches merge field-by-field.
fn merge_ports(raw_ports: Vec<Port>) -> Vec<Port> {
    let mut merged: Vec<Port> = Vec::new();
    for p in raw_ports {
        if let Some(existing) = merged.iter_mut().find(|m| m.matches(&p)) {
            existing.merge_from(&p);
        } else {
            merged.push(p);
        }
    }
    merged
}

fn should_collapse_host_ports(task: &Task) -> bool {
    let not_preparing_or_terminal = !matches!(
        task.state,
        None | Some(TaskState::Preparing) | Some(TaskState::Terminal)
    );
    let host_networking = match &task.agent_ip {
        Some(UnresolvedRef::Resolved(agent_ip)) => {
            task.task_ip.len() == 1 && task.task_ip[0] == IpAddr::V4(*agent_ip)
        }
        _ => false,
    };
    not_preparing_or_terminal && host_networking
}

/// Moves `host_port` into `port`, grouped by `(protocol, port)`, merging
/// fields for entries that land on the same group.
fn collapse_host_ports(ports: &[Port]) -> Vec<Port> {
    let mut out: Vec<Port> = Vec::new();
    for p in ports {
        let mut collapsed = p.clone();
        if let Some(hp) = collapsed.host_port.take() {
            collapsed.port = Some(hp);
        }
        if let Some(existing) = out
            .iter_mut()
            .find(|o| o.protocol == collapsed.protocol && o.port == collapsed.port)
        {
            existing.merge_from(&collapsed);
        } else {
            out.push(collapsed);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_tables() -> (HashMap<AgentId, Ipv4Addr>, HashMap<FrameworkId, String>) {
        (HashMap::new(), HashMap::new())
    }

    #[test]
    fn s2_host_port_collapse() {
        let mut agents = HashMap::new();
        agents.insert("a1".to_owned(), Ipv4Addr::new(10, 0, 0, 1));
        let raw = json!({
            "agent_id": {"value": "a1"},
            "statuses": [{
                "timestamp": 1.0,
                "container_status": {
                    "network_infos": [{"ip_addresses": [{"ip_address": "10.0.0.1"}]}]
                }
            }]
        });
        let (_, frameworks) = empty_tables();
        let mut task = normalize_task(&raw, None, &agents, &frameworks, Some("TASK_RUNNING"));
        task.ports = vec![Port {
            name: None,
            host_port: Some(8080),
            port: None,
            protocol: Protocol::Tcp,
            vip: BTreeSet::new(),
        }];
        let collapsed = collapse_host_ports(&task.ports);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].port, Some(8080));
        assert_eq!(collapsed[0].host_port, None);
    }

    #[test]
    fn field_extraction_never_overwrites_with_empty() {
        let (agents, frameworks) = empty_tables();
        let first = normalize_task(&json!({"name": "foo"}), None, &agents, &frameworks, None);
        assert_eq!(first.name.as_deref(), Some("foo"));

        let second = normalize_task(&json!({}), Some(&first), &agents, &frameworks, None);
        assert_eq!(second.name.as_deref(), Some("foo"));
    }

    #[test]
    fn state_mapping_matches_table() {
        assert_eq!(TaskState::from_raw("TASK_RUNNING"), TaskState::Running);
        assert_eq!(TaskState::from_raw("TASK_KILLING"), TaskState::Killing);
        for terminal in [
            "TASK_FINISHED",
            "TASK_FAILED",
            "TASK_KILLED",
            "TASK_LOST",
            "TASK_ERROR",
            "TASK_DROPPED",
            "TASK_GONE",
            "TASK_GONE_BY_OPERATOR",
        ] {
            assert_eq!(TaskState::from_raw(terminal), TaskState::Terminal);
        }
        assert_eq!(TaskState::from_raw("TASK_STAGING"), TaskState::Preparing);
    }

    #[test]
    fn unresolved_agent_and_framework_produce_unresolved_refs() {
        let (agents, frameworks) = empty_tables();
        let raw = json!({"agent_id": {"value": "a1"}, "framework_id": {"value": "f1"}});
        let task = normalize_task(&raw, None, &agents, &frameworks, None);
        assert_eq!(task.agent_ip, Some(UnresolvedRef::Unresolved("a1".to_owned())));
        assert_eq!(task.framework, Some(UnresolvedRef::Unresolved("f1".to_owned())));
        assert!(task.is_waiting());
    }

    #[test]
    fn health_check_present_without_status_health_yields_false() {
        let (agents, frameworks) = empty_tables();
        let raw = json!({"health_check": {"type": "HTTP"}});
        let task = normalize_task(&raw, None, &agents, &frameworks, None);
        assert_eq!(task.healthy, Some(false));
    }

    #[test]
    fn discovery_ports_default_name_and_scope() {
        let raw = json!({
            "discovery": {"ports": {"ports": [
                {"number": 9000, "protocol": "tcp"}
            ]}}
        });
        let ports = extract_discovery_ports(&raw);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("default"));
        assert_eq!(ports[0].port, Some(9000));
        assert_eq!(ports[0].host_port, None);
    }
}
