//! In-flight RPC requests of one device, ordered by request id.

use std::collections::BTreeMap;

use devplane_core::ids::RpcId;
use devplane_core::rpc::ToDeviceRpcRequest;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingRpc {
    pub request: ToDeviceRpcRequest,
    /// Pushed to at least one session.
    pub sent: bool,
    /// Transport confirmed handoff to the device.
    pub delivered: bool,
    pub retries: u32,
}

impl PendingRpc {
    pub fn new(request: ToDeviceRpcRequest, sent: bool) -> Self {
        Self {
            request,
            sent,
            delivered: false,
            retries: 0,
        }
    }
}

/// Pending queue keyed by a per-device monotonic request id.
///
/// Ids come from [`PendingQueue::next_request_id`] and are never reused, so
/// key order is submission order and a removed id cannot come back.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: BTreeMap<u64, PendingRpc>,
    next_id: u64,
}

impl PendingQueue {
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, request_id: u64, rpc: PendingRpc) {
        let _ = self.entries.insert(request_id, rpc);
    }

    pub fn get(&self, request_id: u64) -> Option<&PendingRpc> {
        self.entries.get(&request_id)
    }

    pub fn get_mut(&mut self, request_id: u64) -> Option<&mut PendingRpc> {
        self.entries.get_mut(&request_id)
    }

    pub fn remove(&mut self, request_id: u64) -> Option<PendingRpc> {
        self.entries.remove(&request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest entry.
    pub fn head(&self) -> Option<(u64, &PendingRpc)> {
        self.entries.iter().next().map(|(id, rpc)| (*id, rpc))
    }

    pub fn find_by_rpc_id(&self, rpc_id: &RpcId) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, rpc)| &rpc.request.id == rpc_id)
            .map(|(id, _)| *id)
    }

    /// Ids of every entry the device has not confirmed yet, oldest first.
    pub fn undelivered(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, rpc)| !rpc.delivered)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn first_undelivered(&self) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, rpc)| !rpc.delivered)
            .map(|(id, _)| *id)
    }

    /// Whether some entry was pushed and is still waiting for its delivery ack.
    pub fn has_unacknowledged(&self) -> bool {
        self.entries.values().any(|rpc| rpc.sent && !rpc.delivered)
    }

    pub fn drain(&mut self) -> Vec<(u64, PendingRpc)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
