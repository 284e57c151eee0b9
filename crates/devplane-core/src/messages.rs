//! Messages exchanged with the transport layer.
//!
//! Inbound traffic arrives as [`TransportToDeviceMsg`], always tagged with the
//! originating session. Outbound traffic leaves as [`ToTransportMsg`],
//! addressed by session id and the node hosting that session.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeKv;
use crate::credentials::DeviceCredentials;
use crate::ids::{NodeId, SessionId};
use crate::rpc::{DeliveryStatus, ToDeviceRpcRequest};
use crate::session::{SessionCloseReason, SessionInfo};

/// Event raised by a transport session of a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportToDeviceMsg {
    pub session_id: SessionId,
    pub session_info: SessionInfo,
    pub event: TransportEvent,
}

impl TransportToDeviceMsg {
    pub fn new(session_id: SessionId, session_info: SessionInfo, event: TransportEvent) -> Self {
        Self {
            session_id,
            session_info,
            event,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportEvent {
    SessionOpened,
    SessionClosed,
    SubscribeToAttributes {
        unsubscribe: bool,
    },
    SubscribeToRpc {
        unsubscribe: bool,
    },
    /// Ask for whatever RPC backlog the session can take now.
    SendPendingRpc,
    #[serde(rename_all = "camelCase")]
    GetAttributes {
        request_id: i32,
        /// `None` reads every client attribute.
        #[serde(default)]
        client_keys: Option<Vec<String>>,
        /// `None` reads every shared attribute.
        #[serde(default)]
        shared_keys: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    RpcResponse {
        request_id: u64,
        #[serde(default)]
        payload: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Heartbeat carrying the session's subscription state.
    #[serde(rename_all = "camelCase")]
    SubscriptionInfo {
        last_activity_time: i64,
        subscribed_to_attributes: bool,
        subscribed_to_rpc: bool,
    },
    #[serde(rename_all = "camelCase")]
    ClaimDevice {
        secret_key: String,
        duration_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    RpcDeliveryStatus {
        request_id: u64,
        status: DeliveryStatus,
    },
    #[serde(rename_all = "camelCase")]
    UplinkNotification {
        uplink_ts: i64,
    },
}

/// RPC as pushed to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToDeviceRpcPush {
    /// Per-device sequence number the device echoes back.
    pub request_id: u64,
    pub method: String,
    pub params: String,
    pub oneway: bool,
    pub expiration_time: i64,
    pub persisted: bool,
}

impl ToDeviceRpcPush {
    pub fn from_request(request_id: u64, request: &ToDeviceRpcRequest) -> Self {
        Self {
            request_id,
            method: request.body.method.clone(),
            params: request.body.params.clone(),
            oneway: request.oneway,
            expiration_time: request.expiration_time,
            persisted: request.persisted,
        }
    }
}

/// Envelope addressed to one session on one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToTransportMsg {
    pub session_id: SessionId,
    pub node_id: NodeId,
    pub payload: ToTransportPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToTransportPayload {
    #[serde(rename_all = "camelCase")]
    GetAttributesResponse {
        request_id: i32,
        client_attributes: Vec<AttributeKv>,
        shared_attributes: Vec<AttributeKv>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AttributeUpdate {
        shared_updated: Vec<AttributeKv>,
        shared_deleted: Vec<String>,
    },
    RpcRequest(ToDeviceRpcPush),
    SessionClose {
        reason: SessionCloseReason,
        message: String,
    },
    CredentialsUpdate(DeviceCredentials),
    #[serde(rename_all = "camelCase")]
    UplinkNotification {
        uplink_ts: i64,
    },
}

impl ToTransportPayload {
    pub fn close(reason: SessionCloseReason) -> Self {
        Self::SessionClose {
            reason,
            message: reason.message().to_owned(),
        }
    }
}
