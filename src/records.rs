//! Record Builder (spec §4.6): translates a normalized task into zero or
//! more DNS records under three synthetic names, plus the zone-wide
//! baseline records.

use dns_mirror_proto::{DnsRecord, Task, UnresolvedRef};
use std::net::Ipv4Addr;

/// Lowercases and strips characters that are not valid in a DNS label.
pub fn dns_safe_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Builds the records a single task contributes. Returns an empty vec for
/// tasks still in `waiting_tasks` (callers should not invoke this on those)
/// and simply omits a record group whose source IP is unavailable.
pub fn build_task_records(task: &Task, zone: &str) -> Vec<DnsRecord> {
    let Some(name) = &task.name else { return Vec::new() };
    let Some(UnresolvedRef::Resolved(framework_name)) = &task.framework else {
        return Vec::new();
    };
    let agent_ip = match &task.agent_ip {
        Some(UnresolvedRef::Resolved(ip)) => Some(*ip),
        _ => None,
    };

    let label_name = dns_safe_label(name);
    let label_framework = dns_safe_label(framework_name);

    let mut out = Vec::new();

    if let Some(ip) = agent_ip {
        out.push(DnsRecord::a(
            format!("{label_name}.{label_framework}.agentip.{zone}"),
            ip,
        ));
    }

    if !task.task_ip.is_empty() {
        let containerip_name = format!("{label_name}.{label_framework}.containerip.{zone}");
        for ip in &task.task_ip {
            out.push(DnsRecord::from_ip(containerip_name.clone(), *ip));
        }
    }

    let autoip_name = format!("{label_name}.{label_framework}.autoip.{zone}");
    let has_host_port = task.ports.iter().any(|p| p.host_port.is_some());
    if has_host_port {
        if let Some(ip) = agent_ip {
            out.push(DnsRecord::a(autoip_name, ip));
        }
    } else if !task.task_ip.is_empty() {
        for ip in &task.task_ip {
            out.push(DnsRecord::from_ip(autoip_name.clone(), *ip));
        }
    } else if let Some(ip) = agent_ip {
        out.push(DnsRecord::a(autoip_name, ip));
    }

    out
}

/// Zone-wide records that are always present regardless of task state:
/// `NS`, `SOA`, and `leader.<zone>`, all pointing at this node since the
/// zone has no separate nameserver identity of its own.
pub fn baseline_records(zone: &str, leader_ip: Ipv4Addr) -> Vec<DnsRecord> {
    vec![
        DnsRecord::a(format!("ns.{zone}"), leader_ip),
        DnsRecord::a(format!("soa.{zone}"), leader_ip),
        DnsRecord::a(format!("leader.{zone}"), leader_ip),
    ]
}
