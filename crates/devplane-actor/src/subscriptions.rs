//! Attribute and RPC subscriber registries.

use devplane_core::ids::{NodeId, SessionId};
use devplane_core::session::SessionInfo;
use indexmap::IndexMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    Attributes,
    Rpc,
}

/// Two independent session-id keyed maps, iterated in subscription order.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    attributes: IndexMap<SessionId, SessionInfo>,
    rpc: IndexMap<SessionId, SessionInfo>,
}

impl SubscriptionRegistry {
    fn map(&self, kind: SubscriptionKind) -> &IndexMap<SessionId, SessionInfo> {
        match kind {
            SubscriptionKind::Attributes => &self.attributes,
            SubscriptionKind::Rpc => &self.rpc,
        }
    }

    fn map_mut(&mut self, kind: SubscriptionKind) -> &mut IndexMap<SessionId, SessionInfo> {
        match kind {
            SubscriptionKind::Attributes => &mut self.attributes,
            SubscriptionKind::Rpc => &mut self.rpc,
        }
    }

    /// Insert or overwrite.
    pub fn subscribe(&mut self, kind: SubscriptionKind, id: SessionId, info: SessionInfo) {
        let _ = self.map_mut(kind).insert(id, info);
    }

    /// Insert only when absent.
    pub fn subscribe_if_absent(&mut self, kind: SubscriptionKind, id: SessionId, info: SessionInfo) {
        let _ = self.map_mut(kind).entry(id).or_insert(info);
    }

    pub fn unsubscribe(&mut self, kind: SubscriptionKind, id: &SessionId) -> Option<SessionInfo> {
        self.map_mut(kind).shift_remove(id)
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, kind: SubscriptionKind, id: &SessionId) -> bool {
        self.map(kind).contains_key(id)
    }

    /// Owned copy of the subscribers, safe to iterate while mutating state.
    pub fn subscribers(&self, kind: SubscriptionKind) -> Vec<(SessionId, SessionInfo)> {
        self.map(kind)
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }

    pub fn has_subscribers(&self, kind: SubscriptionKind) -> bool {
        !self.map(kind).is_empty()
    }

    /// Drop a session from both registries.
    pub fn remove_session(&mut self, id: &SessionId) {
        let _ = self.attributes.shift_remove(id);
        let _ = self.rpc.shift_remove(id);
    }

    /// Drop every subscription owned by `node_id`. Returns how many went away.
    pub fn remove_node(&mut self, node_id: &NodeId) -> usize {
        let before = self.attributes.len() + self.rpc.len();
        self.attributes.retain(|_, info| &info.node_id != node_id);
        self.rpc.retain(|_, info| &info.node_id != node_id);
        before - (self.attributes.len() + self.rpc.len())
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
        self.rpc.clear();
    }
}
