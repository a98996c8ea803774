//! The outbound key-value sink. Treated as an opaque, idempotent,
//! last-writer-wins collaborator per spec §1/§4.7 — this module only
//! defines the contract and a logging stand-in sufficient to exercise the
//! Projector end-to-end in tests.

use crate::error::SinkError;
use dns_mirror_proto::DnsRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

#[async_trait::async_trait]
pub trait ZoneSink: Send + Sync {
    async fn assign(
        &self,
        zone: &str,
        records_by_name: HashMap<String, Vec<DnsRecord>>,
        wallclock_ms: u64,
    ) -> Result<(), SinkError>;
}

/// Logs the zone at `info!` and keeps the latest snapshot in memory, along
/// with a count of how many times `assign` has been called — tests use the
/// count to check the debounce invariant, not just that a push happened.
pub struct LoggingZoneSink {
    last: Mutex<Option<(String, HashMap<String, Vec<DnsRecord>>, u64)>>,
    assign_count: AtomicU64,
}

impl LoggingZoneSink {
    pub fn new() -> Self {
        Self { last: Mutex::new(None), assign_count: AtomicU64::new(0) }
    }

    pub fn latest(&self) -> Option<(String, HashMap<String, Vec<DnsRecord>>, u64)> {
        self.last.lock().expect("lock poisoned").clone()
    }

    pub fn assign_count(&self) -> u64 {
        self.assign_count.load(Ordering::SeqCst)
    }
}

impl Default for LoggingZoneSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ZoneSink for LoggingZoneSink {
    async fn assign(
        &self,
        zone: &str,
        records_by_name: HashMap<String, Vec<DnsRecord>>,
        wallclock_ms: u64,
    ) -> Result<(), SinkError> {
        info!(
            zone,
            names = records_by_name.len(),
            records = records_by_name.values().map(Vec::len).sum::<usize>(),
            wallclock_ms,
            "zone assigned"
        );
        *self.last.lock().expect("lock poisoned") = Some((zone.to_owned(), records_by_name, wallclock_ms));
        self.assign_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
