//! Bounded, insertion-ordered table of a device's transport sessions.

use devplane_core::ids::SessionId;
use devplane_core::session::{SessionInfo, SessionSnapshot, SessionSnapshotEntry, SessionType};
use indexmap::IndexMap;

/// What the actor knows about one open session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SessionMd {
    pub info: SessionInfo,
    pub subscribed_to_attributes: bool,
    pub subscribed_to_rpc: bool,
    pub last_activity_time: i64,
}

impl SessionMd {
    pub fn new(info: SessionInfo, last_activity_time: i64) -> Self {
        Self {
            info,
            subscribed_to_attributes: false,
            subscribed_to_rpc: false,
            last_activity_time,
        }
    }
}

/// Session table with FIFO eviction.
///
/// `len() <= capacity` holds after every call. Inserting a new id into a full
/// table evicts the earliest-inserted entry and hands it back to the caller,
/// so the eviction hook runs exactly once per over-capacity insert.
#[derive(Debug)]
pub(crate) struct SessionTable {
    capacity: usize,
    entries: IndexMap<SessionId, SessionMd>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionMd> {
        self.entries.get_mut(id)
    }

    /// Insert `id` if absent. Returns the evicted entry, if any.
    ///
    /// An id already present is left untouched.
    pub fn insert(&mut self, id: SessionId, md: SessionMd) -> Option<(SessionId, SessionMd)> {
        if self.entries.contains_key(&id) {
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0)
        } else {
            None
        };
        let _ = self.entries.insert(id, md);
        evicted
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionMd> {
        self.entries.shift_remove(id)
    }

    /// Remove and return every session whose last activity is older than
    /// `now - inactivity_timeout_ms`.
    pub fn sweep_expired(&mut self, now: i64, inactivity_timeout_ms: i64) -> Vec<(SessionId, SessionMd)> {
        let threshold = now - inactivity_timeout_ms;
        let expired: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|(_, md)| md.last_activity_time < threshold)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.shift_remove(&id).map(|md| (id, md)))
            .collect()
    }

    /// Remove every session, oldest first.
    pub fn drain(&mut self) -> Vec<(SessionId, SessionMd)> {
        self.entries.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SessionMd)> {
        self.entries.iter()
    }

    /// Checkpoint of every persistent session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            sessions: self
                .entries
                .iter()
                .filter(|(_, md)| md.info.session_type != SessionType::Sync)
                .map(|(id, md)| SessionSnapshotEntry {
                    session_id: id.clone(),
                    node_id: md.info.node_id.clone(),
                    last_activity_time: md.last_activity_time,
                    subscribed_to_attributes: md.subscribed_to_attributes,
                    subscribed_to_rpc: md.subscribed_to_rpc,
                })
                .collect(),
        }
    }
}
