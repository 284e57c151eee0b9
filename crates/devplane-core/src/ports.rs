//! Collaborators a device actor depends on.
//!
//! Lookups and durable writes are async and run off the actor's mailbox.
//! Outbound notifications (transport dispatch, caller responses, device
//! state reports) are fire-and-forget and must never block.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::attributes::{AttributeKv, AttributeScope};
use crate::errors::PortError;
use crate::ids::{DeviceId, EdgeId, NodeId, RpcId, TenantId};
use crate::messages::ToTransportMsg;
use crate::rpc::{RpcRecord, RpcResponse, RpcStatus, ToDeviceRpcRequest};
use crate::session::SessionSnapshot;

/// Device record as seen by the control plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub name: String,
    pub device_type: String,
}

/// Device and relation lookups.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn find_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceInfo>, PortError>;

    /// Edge gateway the device is affiliated with, if any.
    async fn find_edge(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<EdgeId>, PortError>;
}

/// Attribute reads. `keys = None` returns every attribute of the scope.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn find(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        scope: AttributeScope,
        keys: Option<&[String]>,
    ) -> Result<Vec<AttributeKv>, PortError>;
}

/// Durable audit log of persisted RPCs.
#[async_trait]
pub trait RpcAuditLog: Send + Sync {
    async fn create(&self, record: RpcRecord) -> Result<(), PortError>;

    async fn update_status(
        &self,
        rpc_id: &RpcId,
        status: RpcStatus,
        response: Option<serde_json::Value>,
    ) -> Result<(), PortError>;

    /// Records of one device in `status`, oldest first.
    async fn find_by_status(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: RpcStatus,
    ) -> Result<Vec<RpcRecord>, PortError>;
}

/// Cluster-visible cache used to reclaim session affinity.
#[async_trait]
pub trait SessionSnapshotCache: Send + Sync {
    async fn get(&self, device_id: &DeviceId) -> Result<Option<SessionSnapshot>, PortError>;
    async fn put(&self, device_id: &DeviceId, snapshot: SessionSnapshot) -> Result<(), PortError>;
}

/// RPC as forwarded to an edge gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeRpcEvent {
    pub request_id: u64,
    pub request: ToDeviceRpcRequest,
    /// Default outgoing metadata of the device (`deviceName`, `deviceType`).
    pub metadata: BTreeMap<String, String>,
}

/// Edge gateway queue.
#[async_trait]
pub trait EdgeGateway: Send + Sync {
    async fn is_reachable(&self, tenant_id: &TenantId, edge_id: &EdgeId) -> Result<bool, PortError>;

    async fn enqueue_rpc(
        &self,
        tenant_id: &TenantId,
        edge_id: &EdgeId,
        event: EdgeRpcEvent,
    ) -> Result<(), PortError>;
}

/// Device claiming registration.
#[async_trait]
pub trait ClaimService: Send + Sync {
    async fn register_claiming_info(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        secret_key: &str,
        duration_ms: i64,
    ) -> Result<(), PortError>;
}

/// Cluster-wide outbound path to transport nodes.
pub trait TransportDispatcher: Send + Sync {
    fn send(&self, node_id: &NodeId, msg: ToTransportMsg);
}

/// Channel back to whoever submitted an RPC.
///
/// `queued` is sent from the durable write path once the QUEUED record
/// exists, while `respond` comes straight from the device actor. A device
/// that answers quickly can therefore produce the outcome before the
/// queued acknowledgement; callers must accept either order.
pub trait RpcResponder: Send + Sync {
    /// Persisted request was durably queued.
    fn queued(&self, rpc_id: &RpcId);

    /// Terminal outcome of a request.
    fn respond(&self, response: RpcResponse);
}

/// Connectivity and activity tracking of devices.
pub trait DeviceStateReporter: Send + Sync {
    fn on_connect(&self, tenant_id: &TenantId, device_id: &DeviceId);
    fn on_disconnect(&self, tenant_id: &TenantId, device_id: &DeviceId);
    fn on_activity(&self, tenant_id: &TenantId, device_id: &DeviceId, last_activity_time: i64);
}
