//! Assembles PTR/SRV/TXT/A/AAAA records into service entries.
//!
//! The correlator owns its entry table outright; only the query loop touches it.
//! Emitted entries are [`EntryWatch`] views: records merged after emission
//! keep showing up in them until the query ends.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::protocol::INFO_SEPARATOR;
use shared::types::{ScopedIpv6, ServiceEntry};
use crate::mdns::dispatch;
use crate::mdns::message::{Record, RecordKind};
use crate::mdns::reader::Inbound;
use crate::mdns::transport::QueryTarget;

/// Live view of an emitted entry. The sending side goes away when the query
/// finishes, after which the view holds the final state.
pub type EntryWatch = watch::Receiver<ServiceEntry>;

/// Handle to an entry in an [`EntryTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// An entry being assembled, plus bookkeeping that never leaves the correlator
#[derive(Debug, Default)]
pub struct PendingEntry {
    pub entry: ServiceEntry,
    /// A TXT record was applied
    pub has_text: bool,
    /// Already handed to the output channel
    pub sent: bool,
    live: Option<watch::Sender<ServiceEntry>>,
}

impl PendingEntry {
    fn publish(&self) {
        if let Some(live) = &self.live {
            live.send_replace(self.entry.clone());
        }
    }
}

/// In-progress entries keyed by record name.
///
/// Several names may resolve to the same entry: an SRV record whose target
/// differs from its own name makes the target an alias of the record name.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: Vec<PendingEntry>,
    names: HashMap<String, EntryId>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `name`, created on first reference
    pub fn ensure(&mut self, name: &str) -> EntryId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        let id = EntryId(self.entries.len());
        self.entries.push(PendingEntry {
            entry: ServiceEntry::new(name),
            ..PendingEntry::default()
        });
        self.names.insert(name.to_string(), id);
        id
    }

    /// Point `dst` at the entry owned by `src`
    pub fn alias(&mut self, src: &str, dst: &str) -> EntryId {
        let id = self.ensure(src);
        self.names.insert(dst.to_string(), id);
        id
    }

    pub fn resolve(&self, name: &str) -> Option<EntryId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&PendingEntry> {
        self.resolve(name).map(|id| &self.entries[id.0])
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut PendingEntry {
        &mut self.entries[id.0]
    }

    /// Number of distinct entries, aliases not counted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// When an entry is ready to be emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// Any update completes the entry
    #[default]
    Permissive,
    /// Needs an address, a port and a TXT record
    Strict,
}

impl Completeness {
    pub fn is_complete(self, pending: &PendingEntry) -> bool {
        match self {
            Completeness::Permissive => true,
            Completeness::Strict => {
                pending.entry.has_address() && pending.entry.port != 0 && pending.has_text
            }
        }
    }
}

/// What handling one inbound message led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No usable records
    Ignored,
    Emitted(String),
    AlreadySent,
    /// Completed, but the consumer was not ready
    Dropped(String),
    /// Still missing fields; worth a targeted query
    Incomplete(String),
}

pub struct Correlator {
    table: EntryTable,
    completeness: Completeness,
    output: mpsc::Sender<EntryWatch>,
}

impl Correlator {
    pub fn new(completeness: Completeness, output: mpsc::Sender<EntryWatch>) -> Self {
        Self {
            table: EntryTable::new(),
            completeness,
            output,
        }
    }

    pub fn table(&self) -> &EntryTable {
        &self.table
    }

    fn apply_record(&mut self, record: &Record, source: SocketAddr) -> EntryId {
        match &record.kind {
            RecordKind::Pointer(target) => self.table.ensure(target),
            RecordKind::Service { target, port } => {
                if *target != record.name {
                    self.table.alias(&record.name, target);
                }
                let id = self.table.ensure(&record.name);
                let entry = &mut self.table.entry_mut(id).entry;
                entry.host = target.clone();
                entry.port = *port;
                id
            }
            RecordKind::Text(fields) => {
                let id = self.table.ensure(&record.name);
                let pending = self.table.entry_mut(id);
                pending.entry.info = fields.join(INFO_SEPARATOR);
                pending.entry.info_fields = fields.clone();
                pending.has_text = true;
                id
            }
            RecordKind::A(ip) => {
                let id = self.table.ensure(&record.name);
                let entry = &mut self.table.entry_mut(id).entry;
                entry.addr_v4 = Some(*ip);
                entry.addr = Some(IpAddr::V4(*ip));
                id
            }
            RecordKind::Aaaa(ip) => {
                let id = self.table.ensure(&record.name);
                let entry = &mut self.table.entry_mut(id).entry;
                // The wire format cannot carry a scope, so link-local
                // addresses borrow the one the packet arrived on
                let scope_id = match source {
                    SocketAddr::V6(source) if is_link_local(ip) => {
                        Some(source.scope_id()).filter(|scope| *scope != 0)
                    }
                    _ => None,
                };
                entry.addr_v6 = Some(ScopedIpv6 { ip: *ip, scope_id });
                entry.addr = Some(IpAddr::V6(*ip));
                id
            }
        }
    }

    /// Apply every answer and additional record of one message, then check
    /// the last entry it touched for completion.
    pub fn handle(&mut self, inbound: &Inbound) -> Outcome {
        let mut touched: Vec<EntryId> = Vec::new();
        for record in inbound.message.records() {
            let id = self.apply_record(record, inbound.source);
            touched.retain(|seen| *seen != id);
            touched.push(id);
        }
        let Some(&last) = touched.last() else {
            return Outcome::Ignored;
        };
        self.table.entry_mut(last).entry.source_ip = Some(inbound.source.ip());

        for id in &touched {
            self.table.entries[id.0].publish();
        }
        self.check(last)
    }

    fn check(&mut self, id: EntryId) -> Outcome {
        let pending = self.table.entry_mut(id);
        if !self.completeness.is_complete(pending) {
            return Outcome::Incomplete(pending.entry.name.clone());
        }
        if pending.sent {
            return Outcome::AlreadySent;
        }
        pending.sent = true;

        let (live, view) = watch::channel(pending.entry.clone());
        pending.live = Some(live);

        let name = pending.entry.name.clone();
        match self.output.try_send(view) {
            Ok(()) => {
                tracing::debug!("Emitted service entry {}", name);
                Outcome::Emitted(name)
            }
            Err(e) => {
                tracing::debug!("Dropping service entry {}: {}", name, e);
                Outcome::Dropped(name)
            }
        }
    }

    /// Drain the inbound queue until `deadline` or `stop` fires.
    ///
    /// Incomplete entries get a follow-up PTR query on `targets`; failures
    /// there are logged and the loop carries on.
    pub(crate) async fn run(
        &mut self,
        queue: &flume::Receiver<Inbound>,
        deadline: Instant,
        stop: &CancellationToken,
        targets: &[QueryTarget],
    ) {
        let finish = tokio::time::sleep_until(deadline);
        tokio::pin!(finish);

        loop {
            tokio::select! {
                _ = &mut finish => break,
                _ = stop.cancelled() => {
                    tracing::debug!("Client closed during query");
                    break;
                }
                received = queue.recv_async() => {
                    let inbound = match received {
                        Ok(inbound) => inbound,
                        Err(_) => {
                            tracing::debug!("Message queue closed during query");
                            break;
                        }
                    };
                    if let Outcome::Incomplete(name) = self.handle(&inbound) {
                        if let Err(e) = dispatch::send_query(targets, &name, false).await {
                            tracing::error!("Failed to query instance {}: {:#}", name, e);
                        }
                    }
                }
            }
        }
    }
}

/// fe80::/10 unicast or link-local scoped multicast
fn is_link_local(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    (first & 0xffc0) == 0xfe80 || (ip.is_multicast() && (first & 0x000f) == 0x2)
}
