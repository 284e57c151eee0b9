use std::sync::Arc;

use devplane_core::ports::{
    AttributeStore, ClaimService, DeviceDirectory, DeviceStateReporter, EdgeGateway, RpcAuditLog,
    RpcResponder, SessionSnapshotCache, TransportDispatcher,
};
use devplane_core::Clock;
use devplane_settings::ActorSettings;

/// Settings and collaborators shared by every device actor on a node.
#[derive(Clone)]
pub struct ActorServices {
    pub settings: ActorSettings,
    /// Wall clock for deadlines and activity timestamps.
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub attributes: Arc<dyn AttributeStore>,
    /// Durable log of persisted RPCs.
    pub audit_log: Arc<dyn RpcAuditLog>,
    /// Session checkpoints, read at start when affinity is enabled.
    pub session_cache: Arc<dyn SessionSnapshotCache>,
    pub edges: Arc<dyn EdgeGateway>,
    pub claims: Arc<dyn ClaimService>,
    /// Outbound path to the nodes hosting sessions.
    pub transport: Arc<dyn TransportDispatcher>,
    /// Where RPC outcomes and queued-acks go.
    pub responder: Arc<dyn RpcResponder>,
    pub device_state: Arc<dyn DeviceStateReporter>,
}
