//! DNS Projector (spec §4.7): maintains reference-counted records and an
//! inverted name index, debounces zone pushes, and periodically refreshes
//! master records.

use crate::pubsub::Subscription;
use crate::records::{self, build_task_records};
use crate::sink::ZoneSink;
use dns_mirror_proto::{DnsRecord, MirrorMessage, Task, TaskId};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub zone: String,
    pub leader_ip: Ipv4Addr,
    pub resolvers: Vec<Ipv4Addr>,
    pub push_zone_timeout: Duration,
    pub masters_timeout: Duration,
}

pub struct Projector<S: ZoneSink> {
    config: ProjectorConfig,
    sink: Arc<S>,
    task_rrs: HashMap<TaskId, Vec<DnsRecord>>,
    rr_refcount: HashMap<DnsRecord, usize>,
    rr_by_name: HashMap<String, Vec<DnsRecord>>,
    masters: Vec<DnsRecord>,
    rev: u64,
    armed_rev: Option<u64>,
}

impl<S: ZoneSink> Projector<S> {
    pub fn new(config: ProjectorConfig, sink: Arc<S>) -> Self {
        Self {
            config,
            sink,
            task_rrs: HashMap::new(),
            rr_refcount: HashMap::new(),
            rr_by_name: HashMap::new(),
            masters: Vec::new(),
            rev: 0,
            armed_rev: None,
        }
    }

    pub async fn run(mut self, mut sub: Subscription) {
        let mut push_timer: Option<Pin<Box<Sleep>>> = None;
        let mut masters_timer = tokio::time::interval(self.config.masters_timeout);
        masters_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let timer_fires = async {
                match push_timer.as_mut() {
                    Some(t) => t.await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                msg = sub.next() => {
                    match msg {
                        None => break,
                        Some(MirrorMessage::Tasks(tasks)) => self.on_full_snapshot(tasks, &mut push_timer).await,
                        Some(MirrorMessage::TaskUpdated(id, task)) => self.on_task_updated(id, task, &mut push_timer).await,
                        Some(MirrorMessage::Eos) => self.on_eos(&mut push_timer),
                    }
                }
                _ = masters_timer.tick() => {
                    self.refresh_masters(&mut push_timer).await;
                }
                () = timer_fires => {
                    self.on_timer_fired(&mut push_timer).await;
                }
            }
        }
    }

    async fn on_full_snapshot(&mut self, tasks: Vec<(TaskId, Task)>, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        self.task_rrs.clear();
        self.rr_refcount.clear();
        self.rr_by_name.clear();

        for (id, task) in tasks {
            let records = build_task_records(&task, &self.config.zone);
            for r in &records {
                *self.rr_refcount.entry(r.clone()).or_insert(0) += 1;
            }
            self.task_rrs.insert(id, records);
        }
        self.rebuild_name_index();

        *push_timer = None;
        self.armed_rev = None;
        self.rev += 1;
        self.push_zone().await;
        let armed = self.rev;
        *push_timer = Some(Box::pin(tokio::time::sleep(self.config.push_zone_timeout)));
        self.armed_rev = Some(armed);
    }

    async fn on_task_updated(&mut self, id: TaskId, task: Task, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        let new_records = if task.state.map(dns_mirror_proto::TaskState::is_terminal) == Some(true) {
            Vec::new()
        } else {
            build_task_records(&task, &self.config.zone)
        };

        let prior = self.task_rrs.remove(&id).unwrap_or_default();
        let removed: Vec<&DnsRecord> = prior.iter().filter(|r| !new_records.contains(r)).collect();
        let added: Vec<&DnsRecord> = new_records.iter().filter(|r| !prior.contains(r)).collect();
        let changed = !removed.is_empty() || !added.is_empty();

        for r in removed {
            if let Some(count) = self.rr_refcount.get_mut(r) {
                *count -= 1;
                if *count == 0 {
                    self.rr_refcount.remove(r);
                    if let Some(bucket) = self.rr_by_name.get_mut(&r.name) {
                        bucket.retain(|x| x != r);
                        if bucket.is_empty() {
                            self.rr_by_name.remove(&r.name);
                        }
                    }
                }
            }
        }
        for r in &added {
            let count = self.rr_refcount.entry((*r).clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                self.rr_by_name.entry(r.name.clone()).or_default().push((*r).clone());
            }
        }

        if !new_records.is_empty() {
            self.task_rrs.insert(id, new_records);
        }

        if changed {
            self.on_change(push_timer).await;
        }
    }

    fn on_eos(&mut self, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        *push_timer = None;
        self.armed_rev = None;
        self.masters.clear();
        debug!("projector: eos received, timers cancelled, records retained");
    }

    async fn refresh_masters(&mut self, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        let name = format!("master.{}", self.config.zone);
        let new_masters: Vec<DnsRecord> = self
            .config
            .resolvers
            .iter()
            .map(|ip| DnsRecord::a(name.clone(), *ip))
            .collect();
        if new_masters != self.masters {
            self.masters = new_masters;
            self.on_change(push_timer).await;
        }
    }

    async fn on_change(&mut self, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        self.rev += 1;
        if push_timer.is_none() {
            self.push_zone().await;
            let armed = self.rev;
            *push_timer = Some(Box::pin(tokio::time::sleep(self.config.push_zone_timeout)));
            self.armed_rev = Some(armed);
        }
    }

    async fn on_timer_fired(&mut self, push_timer: &mut Option<Pin<Box<Sleep>>>) {
        let armed_rev = self.armed_rev.take().unwrap_or(self.rev);
        if armed_rev < self.rev {
            self.push_zone().await;
            let armed = self.rev;
            *push_timer = Some(Box::pin(tokio::time::sleep(self.config.push_zone_timeout)));
            self.armed_rev = Some(armed);
        } else {
            *push_timer = None;
        }
    }

    fn rebuild_name_index(&mut self) {
        self.rr_by_name.clear();
        for r in self.rr_refcount.keys() {
            self.rr_by_name.entry(r.name.clone()).or_default().push(r.clone());
        }
    }

    async fn push_zone(&self) {
        let mut records_by_name = self.rr_by_name.clone();
        for r in records::baseline_records(&self.config.zone, self.config.leader_ip) {
            records_by_name.entry(r.name.clone()).or_default().push(r);
        }
        if !self.masters.is_empty() {
            let name = format!("master.{}", self.config.zone);
            records_by_name.entry(name).or_default().extend(self.masters.clone());
        }

        let wallclock_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if let Err(e) = self.sink.assign(&self.config.zone, records_by_name, wallclock_ms).await {
            tracing::error!(error = %e, "zone push failed");
        }
    }
}
