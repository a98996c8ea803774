//! Configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/dns-mirror/config.toml`.
//!
//! All fields are optional in the file; every field has a default matching
//! the external-interfaces table.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DCOS_DOMAIN: &str = "dcos.thisdcos.directory";

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base URL of the cluster operator API, e.g. `http://leader.mesos:5050`.
    pub master_url: String,
    pub reconnect_timeout: Duration,
    pub reconnect_max_timeout: Duration,
    pub agents_readiness_timeout: Duration,
    pub tasks_readiness_timeout: Duration,
    pub masters_timeout: Duration,
    pub push_zone_timeout: Duration,
    /// IP addresses of cluster masters, used to build `master.<domain>` records.
    pub resolvers: Vec<std::net::Ipv4Addr>,
    pub zone: String,
    /// This node's own IP, published as `leader.<domain>`.
    pub leader_ip: std::net::Ipv4Addr,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    master_url: Option<String>,
    reconnect_timeout_ms: Option<u64>,
    reconnect_max_timeout_ms: Option<u64>,
    agents_readiness_timeout_ms: Option<u64>,
    tasks_readiness_timeout_ms: Option<u64>,
    masters_timeout_ms: Option<u64>,
    push_zone_timeout_ms: Option<u64>,
    resolvers: Option<Vec<String>>,
    zone: Option<String>,
    leader_ip: Option<String>,
}

pub fn load_config_from_path(path: &Path) -> Result<MirrorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<MirrorConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/dns-mirror/config.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<MirrorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let master_url = raw
        .master_url
        .ok_or_else(|| ConfigError::MissingField("master_url".to_owned()))?;

    let mut resolvers = Vec::new();
    for (i, r) in raw.resolvers.unwrap_or_default().into_iter().enumerate() {
        let ip = r
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("resolvers[{i}] '{r}' is not an IPv4 address")))?;
        resolvers.push(ip);
    }

    let leader_ip = match raw.leader_ip {
        Some(s) => s
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("leader_ip '{s}' is not an IPv4 address")))?,
        None => std::net::Ipv4Addr::LOCALHOST,
    };

    Ok(MirrorConfig {
        master_url,
        reconnect_timeout: Duration::from_millis(raw.reconnect_timeout_ms.unwrap_or(2000)),
        reconnect_max_timeout: Duration::from_millis(raw.reconnect_max_timeout_ms.unwrap_or(30_000)),
        agents_readiness_timeout: Duration::from_millis(
            raw.agents_readiness_timeout_ms.unwrap_or(600_000),
        ),
        tasks_readiness_timeout: Duration::from_millis(
            raw.tasks_readiness_timeout_ms.unwrap_or(10_000),
        ),
        masters_timeout: Duration::from_millis(raw.masters_timeout_ms.unwrap_or(5_000)),
        push_zone_timeout: Duration::from_millis(raw.push_zone_timeout_ms.unwrap_or(1_000)),
        resolvers,
        zone: raw.zone.unwrap_or_else(|| DCOS_DOMAIN.to_owned()),
        leader_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_required_field_present() {
        let cfg = load_config_from_str(r#"master_url = "http://leader.mesos:5050""#).unwrap();
        assert_eq!(cfg.reconnect_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.reconnect_max_timeout, Duration::from_millis(30_000));
        assert_eq!(cfg.agents_readiness_timeout, Duration::from_millis(600_000));
        assert_eq!(cfg.tasks_readiness_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.push_zone_timeout, Duration::from_millis(1_000));
        assert_eq!(cfg.zone, DCOS_DOMAIN);
        assert!(cfg.resolvers.is_empty());
    }

    #[test]
    fn missing_master_url_is_an_error() {
        let err = load_config_from_str("zone = \"example.\"").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "master_url"));
    }

    #[test]
    fn rejects_unparseable_resolver() {
        let err = load_config_from_str(
            r#"
            master_url = "http://leader.mesos:5050"
            resolvers = ["not-an-ip"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
