//! The Mirror's in-memory state and its pure transitions (spec §4.2, §4.4,
//! minus the connection lifecycle itself — see [`super::actor`]).
//!
//! Kept free of any I/O so the ordering hazards in §4's event handlers
//! (out-of-order agent/framework references, waiting-task resolution,
//! terminal removal) can be driven directly in tests without a stream.

use dns_mirror_proto::{AgentId, FrameworkId, MirrorMessage, Task, TaskId, UnresolvedRef};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AwaitAgents,
    AwaitTasks,
    Serve,
}

#[derive(Debug, Default)]
pub struct MirrorState {
    pub agents: HashMap<AgentId, Ipv4Addr>,
    pub recovered_agents: HashSet<AgentId>,
    pub frameworks: HashMap<FrameworkId, String>,
    pub tasks: HashMap<TaskId, Task>,
    pub waiting_tasks: HashSet<TaskId>,
}

impl MirrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full reset on stream death: every entity is forgotten because the
    /// next connection's SUBSCRIBED snapshot will repopulate everything.
    pub fn reset(&mut self) {
        self.agents.clear();
        self.recovered_agents.clear();
        self.frameworks.clear();
        self.tasks.clear();
        self.waiting_tasks.clear();
    }

    pub fn agents_total(&self) -> usize {
        self.agents.len()
    }

    pub fn frameworks_total(&self) -> usize {
        self.frameworks.len()
    }

    pub fn tasks_total(&self) -> usize {
        self.tasks.len()
    }

    pub fn waiting_tasks_total(&self) -> usize {
        self.waiting_tasks.len()
    }

    /// Ingests an already-normalized task (spec §4.4 "Ingest"). Only acts
    /// if the normalized record actually differs from what is stored; a
    /// no-op diff returns `None` (no outbound `task_updated`).
    pub fn ingest_task(&mut self, id: TaskId, task: Task) -> Option<MirrorMessage> {
        if self.tasks.get(&id) == Some(&task) {
            return None;
        }

        if task.state.map(dns_mirror_proto::TaskState::is_terminal) == Some(true) {
            self.tasks.remove(&id);
            self.waiting_tasks.remove(&id);
            return Some(MirrorMessage::TaskUpdated(id, task));
        }

        let waiting = task.is_waiting();
        self.tasks.insert(id.clone(), task.clone());
        if waiting {
            self.waiting_tasks.insert(id);
            None
        } else {
            self.waiting_tasks.remove(&id);
            Some(MirrorMessage::TaskUpdated(id, task))
        }
    }

    /// Inserts/replaces a framework, then resolves any waiting tasks whose
    /// `framework` referenced this id.
    pub fn framework_added_updated(&mut self, id: FrameworkId, name: String) -> Vec<MirrorMessage> {
        self.frameworks.insert(id.clone(), name.clone());
        self.resolve_waiting(|t| {
            matches!(&t.framework, Some(UnresolvedRef::Unresolved(fid)) if *fid == id)
        }, |t| t.framework = Some(UnresolvedRef::Resolved(name.clone())))
    }

    /// Deletes a framework by id. Tasks retain their last-seen framework
    /// name since that was already copied into the task record.
    pub fn framework_removed(&mut self, id: &str) {
        self.frameworks.remove(id);
    }

    /// Inserts an agent, drops it from `recovered_agents`, and resolves any
    /// waiting tasks whose `agent_ip` referenced this id.
    pub fn agent_added(&mut self, id: AgentId, ip: Ipv4Addr) -> Vec<MirrorMessage> {
        self.agents.insert(id.clone(), ip);
        self.recovered_agents.remove(&id);
        self.resolve_waiting(|t| {
            matches!(&t.agent_ip, Some(UnresolvedRef::Unresolved(aid)) if *aid == id)
        }, |t| t.agent_ip = Some(UnresolvedRef::Resolved(ip)))
    }

    pub fn agent_removed(&mut self, id: &str) {
        self.agents.remove(id);
        self.recovered_agents.remove(id);
    }

    /// Iterates `waiting_tasks`, applying `patch` to each task matched by
    /// `matches`, and publishes `task_updated` for any that become fully
    /// resolved as a result.
    fn resolve_waiting(
        &mut self,
        matches: impl Fn(&Task) -> bool,
        patch: impl Fn(&mut Task),
    ) -> Vec<MirrorMessage> {
        let candidates: Vec<TaskId> = self
            .waiting_tasks
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(&matches))
            .cloned()
            .collect();

        let mut published = Vec::new();
        for id in candidates {
            let Some(task) = self.tasks.get_mut(&id) else { continue };
            patch(task);
            if !task.is_waiting() {
                self.waiting_tasks.remove(&id);
                published.push(MirrorMessage::TaskUpdated(id, task.clone()));
            }
        }
        published
    }

    /// Full-snapshot message for phase transition into `serve` (and after
    /// every reconnect that reaches it).
    pub fn full_snapshot(&self) -> MirrorMessage {
        MirrorMessage::Tasks(
            self.tasks
                .iter()
                .filter(|(id, _)| !self.waiting_tasks.contains(*id))
                .map(|(id, t)| (id.clone(), t.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_mirror_proto::TaskState;

    fn waiting_task(agent: &str, framework: &str) -> Task {
        Task {
            agent_ip: Some(UnresolvedRef::Unresolved(agent.to_owned())),
            framework: Some(UnresolvedRef::Unresolved(framework.to_owned())),
            state: Some(TaskState::Running),
            ..Default::default()
        }
    }

    #[test]
    fn s1_out_of_order_references_resolve_in_either_order() {
        let mut m = MirrorState::new();
        let id = TaskId::new("f1", "t1");

        let msg = m.ingest_task(id.clone(), waiting_task("a1", "f1"));
        assert!(msg.is_none());
        assert!(m.waiting_tasks.contains(&id));

        let msgs = m.agent_added("a1".to_owned(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(msgs.is_empty(), "still waiting on framework");
        assert!(m.waiting_tasks.contains(&id));

        let msgs = m.framework_added_updated("f1".to_owned(), "myframework".to_owned());
        assert_eq!(msgs.len(), 1);
        assert!(!m.waiting_tasks.contains(&id));
        match &msgs[0] {
            MirrorMessage::TaskUpdated(tid, task) => {
                assert_eq!(*tid, id);
                assert!(!task.is_waiting());
            }
            _ => panic!("expected TaskUpdated"),
        }
    }

    #[test]
    fn s4_terminal_transition_removes_task() {
        let mut m = MirrorState::new();
        let id = TaskId::new("f1", "t1");
        let running = Task {
            agent_ip: Some(UnresolvedRef::Resolved(Ipv4Addr::new(10, 0, 0, 1))),
            framework: Some(UnresolvedRef::Resolved("f1".to_owned())),
            state: Some(TaskState::Running),
            ..Default::default()
        };
        m.ingest_task(id.clone(), running.clone());
        assert_eq!(m.tasks_total(), 1);

        let terminal = Task { state: Some(TaskState::Terminal), ..running };
        let msg = m.ingest_task(id.clone(), terminal);
        assert!(matches!(msg, Some(MirrorMessage::TaskUpdated(tid, _)) if tid == id));
        assert_eq!(m.tasks_total(), 0);
        assert!(!m.waiting_tasks.contains(&id));
    }

    #[test]
    fn unchanged_reingest_produces_no_publication() {
        let mut m = MirrorState::new();
        let id = TaskId::new("f1", "t1");
        let task = Task {
            agent_ip: Some(UnresolvedRef::Resolved(Ipv4Addr::new(10, 0, 0, 1))),
            framework: Some(UnresolvedRef::Resolved("f1".to_owned())),
            state: Some(TaskState::Running),
            ..Default::default()
        };
        assert!(m.ingest_task(id.clone(), task.clone()).is_some());
        assert!(m.ingest_task(id, task).is_none());
    }

    #[test]
    fn framework_removed_does_not_touch_tasks() {
        let mut m = MirrorState::new();
        m.framework_added_updated("f1".to_owned(), "name".to_owned());
        let id = TaskId::new("f1", "t1");
        m.ingest_task(
            id.clone(),
            Task {
                agent_ip: Some(UnresolvedRef::Resolved(Ipv4Addr::new(10, 0, 0, 1))),
                framework: Some(UnresolvedRef::Resolved("name".to_owned())),
                state: Some(TaskState::Running),
                ..Default::default()
            },
        );
        m.framework_removed("f1");
        assert!(!m.frameworks.contains_key("f1"));
        assert_eq!(m.tasks.get(&id).unwrap().framework, Some(UnresolvedRef::Resolved("name".to_owned())));
    }
}
