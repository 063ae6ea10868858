//! Connection registry: the open and pending channels of this session.
//!
//! Entries are keyed by remote identifier, one handle per id, kept in
//! registration order. The set of remote ids is persisted under
//! [`PEERS_KEY`] as a JSON array after every successful register/remove so
//! [`Registry::restore_all`] can re-dial them on the next run. Ids that fail
//! to restore stay persisted and are tried again next time.
//!
//! Registering an entry takes its handle's event stream and forwards every
//! notification to the session channel tagged with the entry's serial.

use crate::core::config::PEERS_KEY;
use crate::core::connection::transport::{ChannelStatus, TransportHandle};
use crate::core::events::{EventSender, SessionEvent};
use crate::core::identity::EndpointId;
use crate::core::signaling::Discovery;
use crate::core::storage::SessionStore;
use crate::core::transfer::TransferState;
use crate::utils::sos::SignalOfStop;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Open,
    Closed,
    Errored,
}

impl EntryStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

pub struct ConnectionEntry {
    pub remote: EndpointId,
    pub handle: Arc<dyn TransportHandle>,
    pub status: EntryStatus,
    pub transfer: TransferState,
    /// Distinguishes this entry from an earlier one for the same id.
    pub serial: u64,
    /// Stop signal of the running send loop, if any.
    pub stop: Option<SignalOfStop>,
}

impl ConnectionEntry {
    pub fn is_open(&self) -> bool {
        self.status == EntryStatus::Open && self.handle.status().is_open()
    }
}

pub struct Registry {
    entries: HashMap<EndpointId, ConnectionEntry>,
    order: Vec<EndpointId>,
    persisted: Vec<EndpointId>,
    store: Arc<dyn SessionStore>,
    events: EventSender,
    next_serial: u64,
}

impl Registry {
    /// Empty registry; the persisted id set is read from `store`.
    pub fn new(store: Arc<dyn SessionStore>, events: EventSender) -> Self {
        let persisted = Self::load(store.as_ref());
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            persisted,
            store,
            events,
            next_serial: 0,
        }
    }

    fn load(store: &dyn SessionStore) -> Vec<EndpointId> {
        let Some(content) = store.get(PEERS_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<EndpointId>>(&content) {
            Ok(ids) => {
                debug!(event = "registry_loaded", peers = ids.len(), "Persisted peer ids loaded");
                ids
            }
            Err(e) => {
                error!(
                    event = "registry_parse_failure",
                    error = %e,
                    "Failed to parse persisted peer ids, starting fresh"
                );
                Vec::new()
            }
        }
    }

    fn save(&self) {
        match serde_json::to_string(&self.persisted) {
            Ok(content) => self.store.set(PEERS_KEY, &content),
            Err(e) => warn!(event = "registry_save_failure", error = %e, "Failed to persist peer ids"),
        }
    }

    /// Add an entry for `remote`. The first registration wins; a duplicate
    /// is ignored and returns `None`.
    pub fn register(&mut self, remote: EndpointId, handle: Arc<dyn TransportHandle>) -> Option<u64> {
        if self.entries.contains_key(&remote) {
            debug!(event = "registry_duplicate", remote = %remote, "Already registered, ignoring");
            return None;
        }
        self.next_serial += 1;
        let serial = self.next_serial;

        if let Some(mut events) = handle.subscribe() {
            let tx = self.events.clone();
            let id = remote.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let forwarded = SessionEvent::Transport {
                        remote: id.clone(),
                        serial,
                        event,
                    };
                    if tx.send(forwarded).is_err() {
                        break;
                    }
                }
            });
        } else {
            warn!(event = "registry_no_events", remote = %remote, "Handle events already taken");
        }

        let status = match handle.status() {
            ChannelStatus::Open => EntryStatus::Open,
            ChannelStatus::Connecting => EntryStatus::Pending,
            ChannelStatus::Closing | ChannelStatus::Closed => EntryStatus::Closed,
        };
        self.entries.insert(
            remote.clone(),
            ConnectionEntry {
                remote: remote.clone(),
                handle,
                status,
                transfer: TransferState::default(),
                serial,
                stop: None,
            },
        );
        self.order.push(remote.clone());
        if !self.persisted.contains(&remote) {
            self.persisted.push(remote.clone());
        }
        self.save();
        info!(event = "registry_register", remote = %remote, serial, "Connection registered");
        Some(serial)
    }

    /// Close and drop the entry for `remote`, cancel its send loop and stop
    /// restoring it. Returns whether an entry existed.
    pub async fn remove(&mut self, remote: &EndpointId) -> bool {
        let Some(mut entry) = self.entries.remove(remote) else {
            return false;
        };
        self.order.retain(|id| id != remote);
        self.persisted.retain(|id| id != remote);
        self.save();

        if let Some(stop) = entry.stop.take() {
            stop.cancel();
        }
        entry.transfer.reset();
        if entry.handle.status() != ChannelStatus::Closed {
            entry.handle.close().await;
        }
        info!(event = "registry_remove", remote = %remote, "Connection removed");
        true
    }

    pub fn get(&self, remote: &EndpointId) -> Option<&ConnectionEntry> {
        self.entries.get(remote)
    }

    pub fn get_mut(&mut self, remote: &EndpointId) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(remote)
    }

    /// Entry for `remote` only if it is still the one with `serial`.
    pub fn current_mut(&mut self, remote: &EndpointId, serial: u64) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(remote).filter(|entry| entry.serial == serial)
    }

    pub fn mark(&mut self, remote: &EndpointId, status: EntryStatus) {
        if let Some(entry) = self.entries.get_mut(remote)
            && entry.status != status
        {
            debug!(event = "registry_mark", remote = %remote, status = status.label());
            entry.status = status;
        }
    }

    /// Remote ids in registration order. The iterator can be cloned to
    /// walk the same sequence again.
    pub fn list(&self) -> impl Iterator<Item = &EndpointId> + Clone + '_ {
        self.order.iter()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether any entry is sending or receiving a file.
    pub fn any_transfer_active(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.transfer.is_sending() || e.transfer.is_receiving())
    }

    /// Re-dial every persisted id that has no entry. Dials run concurrently;
    /// a failure is logged and the id skipped. Returns the ids restored.
    pub async fn restore_all(&mut self, discovery: &dyn Discovery) -> Vec<EndpointId> {
        let wanted: Vec<EndpointId> = self
            .persisted
            .iter()
            .filter(|id| !self.entries.contains_key(*id))
            .cloned()
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }
        info!(event = "registry_restore", peers = wanted.len(), "Restoring persisted connections");

        let dials = wanted.iter().map(|id| discovery.dial(id));
        let results = futures_util::future::join_all(dials).await;

        let mut restored = Vec::new();
        for (id, result) in wanted.into_iter().zip(results) {
            match result {
                Ok(handle) => {
                    if self.register(id.clone(), handle).is_some() {
                        restored.push(id);
                    }
                }
                Err(e) => warn!(
                    event = "registry_restore_failure",
                    remote = %id,
                    error = %e,
                    "Could not restore connection, skipping"
                ),
            }
        }
        restored
    }
}
