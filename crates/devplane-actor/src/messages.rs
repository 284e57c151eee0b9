//! Mailbox protocol of a device actor.

use devplane_core::attributes::{AttributeKv, AttributeScope};
use devplane_core::credentials::DeviceCredentials;
use devplane_core::ids::{EdgeId, NodeId, RpcId, SessionId};
use devplane_core::messages::TransportToDeviceMsg;
use devplane_core::rpc::ToDeviceRpcRequest;
use tokio::sync::{mpsc, oneshot};

/// Messages accepted from outside the actor.
#[derive(Clone, Debug)]
pub enum DeviceMsg {
    /// Event raised by one of the device's transport sessions.
    Transport(TransportToDeviceMsg),
    /// New server-to-device RPC.
    SubmitRpc(ToDeviceRpcRequest),
    /// Operator removed an RPC.
    RemoveRpc(RpcId),
    AttributesUpdated {
        scope: AttributeScope,
        values: Vec<AttributeKv>,
    },
    AttributesDeleted {
        scope: AttributeScope,
        keys: Vec<String>,
    },
    CredentialsUpdated(DeviceCredentials),
    /// Edge affiliation changed (`None` = no edge).
    EdgeChanged(Option<EdgeId>),
    DeviceRenamed {
        name: String,
        device_type: String,
    },
    /// A transport node left the cluster.
    NodeRemoved(NodeId),
    DeviceDeleted,
}

/// Timer fires and async completions posted back by the actor itself.
#[derive(Debug)]
pub(crate) enum InternalMsg {
    SubmitTimeout {
        request_id: u64,
    },
    AwaitTimeout {
        request_id: u64,
        generation: u64,
    },
    SweepSessions,
    AttributesFetched {
        session_id: SessionId,
        node_id: NodeId,
        request_id: i32,
        result: Result<(Vec<AttributeKv>, Vec<AttributeKv>), String>,
    },
    EdgeChecked {
        request_id: u64,
        edge_id: EdgeId,
        result: Result<bool, String>,
    },
}

#[derive(Debug)]
pub(crate) enum Envelope {
    External(DeviceMsg),
    Internal(InternalMsg),
    /// Reply once every earlier message and durable write is done.
    Flush(oneshot::Sender<()>),
}

/// Weak handle the actor uses to post into its own mailbox. Holding it does
/// not keep the actor alive.
#[derive(Clone, Debug)]
pub(crate) struct SelfMailbox {
    tx: mpsc::WeakUnboundedSender<Envelope>,
}

impl SelfMailbox {
    pub fn new(tx: &mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx: tx.downgrade() }
    }

    pub fn post(&self, msg: InternalMsg) {
        match self.tx.upgrade() {
            Some(tx) => {
                if tx.send(Envelope::Internal(msg)).is_err() {
                    tracing::debug!("actor mailbox closed, dropping self message");
                }
            }
            None => tracing::debug!("actor gone, dropping self message"),
        }
    }
}
