//! Shared domain types for the DNS mirror: task/agent/framework identities,
//! the normalized task record, DNS record values, and the messages the
//! Mirror publishes to its subscribers.
//!
//! Kept in its own crate so the mock operator stream server
//! (`dns-mirror-test-support`) and the core crate agree on one vocabulary
//! without a circular dependency.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

pub type AgentId = String;
pub type FrameworkId = String;
pub type TaskRawId = String;

/// A task is identified by the pair of its owning framework and its
/// framework-local raw id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub framework_id: FrameworkId,
    pub raw_id: TaskRawId,
}

impl TaskId {
    pub fn new(framework_id: impl Into<FrameworkId>, raw_id: impl Into<TaskRawId>) -> Self {
        Self {
            framework_id: framework_id.into(),
            raw_id: raw_id.into(),
        }
    }
}

/// A reference to another entity that may not have arrived yet. Carries the
/// opaque id so that once the referent shows up, the waiting value can be
/// resolved in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedRef<T> {
    Resolved(T),
    Unresolved(String),
}

impl<T> UnresolvedRef<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, UnresolvedRef::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            UnresolvedRef::Resolved(v) => Some(v),
            UnresolvedRef::Unresolved(_) => None,
        }
    }

    pub fn unresolved_id(&self) -> Option<&str> {
        match self {
            UnresolvedRef::Resolved(_) => None,
            UnresolvedRef::Unresolved(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: AgentId,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framework {
    pub id: FrameworkId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Preparing,
    Running,
    Killing,
    Terminal,
}

impl TaskState {
    /// Maps a raw Mesos task status string onto the four-way state lattice.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "TASK_RUNNING" => TaskState::Running,
            "TASK_KILLING" => TaskState::Killing,
            "TASK_FINISHED" | "TASK_FAILED" | "TASK_KILLED" | "TASK_LOST" | "TASK_ERROR"
            | "TASK_DROPPED" | "TASK_GONE" | "TASK_GONE_BY_OPERATOR" => TaskState::Terminal,
            _ => TaskState::Preparing,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Terminal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Docker,
    Mesos,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// A single normalized port. Two ports are the "same port" for merge
/// purposes iff they share a protocol and either `port` or `host_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: Option<String>,
    pub host_port: Option<u16>,
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub vip: BTreeSet<String>,
}

impl Port {
    pub fn matches(&self, other: &Port) -> bool {
        self.protocol == other.protocol
            && ((self.port.is_some() && self.port == other.port)
                || (self.host_port.is_some() && self.host_port == other.host_port))
    }

    /// Merges `other` into `self`, field by field, union-ing VIP labels.
    /// Neither side's present fields are ever blanked by an absent field on
    /// the other side.
    pub fn merge_from(&mut self, other: &Port) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.host_port.is_none() {
            self.host_port = other.host_port;
        }
        if self.port.is_none() {
            self.port = other.port;
        }
        self.vip.extend(other.vip.iter().cloned());
    }
}

/// The normalized task record. Every field is optional: absent fields are
/// never written over a previously known value (see [`Task::merge_from`]).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Task {
    pub name: Option<String>,
    pub framework: Option<UnresolvedRef<String>>,
    pub agent_ip: Option<UnresolvedRef<Ipv4Addr>>,
    pub task_ip: Vec<IpAddr>,
    pub state: Option<TaskState>,
    pub healthy: Option<bool>,
    pub ports: Vec<Port>,
    pub runtime: Option<Runtime>,
}

impl Task {
    /// True iff any reference-bearing field is still unresolved.
    pub fn is_waiting(&self) -> bool {
        let agent_waiting = matches!(self.agent_ip, Some(UnresolvedRef::Unresolved(_)));
        let framework_waiting = matches!(self.framework, Some(UnresolvedRef::Unresolved(_)));
        agent_waiting || framework_waiting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    A,
    Aaaa,
}

/// A DNS resource record. Compares by full value; `name`/`data` are expected
/// to already be in canonical form (lowercased name, canonical IP text) by
/// the time one is constructed, so that it is sound to use as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: RecordTypeWire,
    pub data: String,
}

/// Wire-serializable mirror of [`RecordType`]; kept separate so the domain
/// type can stay free of serde derives used only for the zone payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordTypeWire {
    A,
    Aaaa,
}

impl From<RecordType> for RecordTypeWire {
    fn from(t: RecordType) -> Self {
        match t {
            RecordType::A => RecordTypeWire::A,
            RecordType::Aaaa => RecordTypeWire::Aaaa,
        }
    }
}

impl DnsRecord {
    pub fn a(name: impl Into<String>, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            rtype: RecordTypeWire::A,
            data: addr.to_string(),
        }
    }

    pub fn from_ip(name: impl Into<String>, addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::a(name, v4),
            IpAddr::V6(v6) => Self {
                name: name.into(),
                rtype: RecordTypeWire::Aaaa,
                data: v6.to_string(),
            },
        }
    }
}

/// Messages the Mirror fans out to subscribers (the Projector, chiefly).
#[derive(Debug, Clone)]
pub enum MirrorMessage {
    /// Full-snapshot publication, sent once on entry to the `serve` phase
    /// and again after every reconnect that reaches `serve`.
    Tasks(Vec<(TaskId, Task)>),
    /// Incremental update for a single task (including terminal removals,
    /// which carry `state: Terminal`).
    TaskUpdated(TaskId, Task),
    /// The stream died; the Mirror is resetting to `init`.
    Eos,
}
