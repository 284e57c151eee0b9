//! Server-to-device RPC model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;
use crate::ids::{DeviceId, RpcId, TenantId};

/// Policy governing how many RPCs may be outstanding per device and which
/// confirmation moves the queue forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcSubmitStrategy {
    /// No gating: everything is pushed as soon as a session can take it.
    #[default]
    Burst,
    /// One request in flight until the transport confirms delivery.
    SequentialOnAckFromDevice,
    /// One request in flight until the device answers.
    SequentialOnResponseFromDevice,
}

impl RpcSubmitStrategy {
    pub fn is_sequential(self) -> bool {
        !matches!(self, Self::Burst)
    }
}

impl std::fmt::Display for RpcSubmitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Burst => write!(f, "BURST"),
            Self::SequentialOnAckFromDevice => write!(f, "SEQUENTIAL_ON_ACK_FROM_DEVICE"),
            Self::SequentialOnResponseFromDevice => write!(f, "SEQUENTIAL_ON_RESPONSE_FROM_DEVICE"),
        }
    }
}

impl std::str::FromStr for RpcSubmitStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BURST" => Ok(Self::Burst),
            "SEQUENTIAL_ON_ACK_FROM_DEVICE" => Ok(Self::SequentialOnAckFromDevice),
            "SEQUENTIAL_ON_RESPONSE_FROM_DEVICE" => Ok(Self::SequentialOnResponseFromDevice),
            other => Err(format!("unknown rpc submit strategy: {other}")),
        }
    }
}

/// Lifecycle status recorded in the durable RPC log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcStatus {
    Queued,
    Sent,
    Delivered,
    Successful,
    Timeout,
    Expired,
    Failed,
    Deleted,
}

impl RpcStatus {
    /// Whether no further transition is expected.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Expired | Self::Failed | Self::Deleted
        )
    }
}

impl std::fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Successful => "SUCCESSFUL",
            Self::Timeout => "TIMEOUT",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RpcStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "SENT" => Ok(Self::Sent),
            "DELIVERED" => Ok(Self::Delivered),
            "SUCCESSFUL" => Ok(Self::Successful),
            "TIMEOUT" => Ok(Self::Timeout),
            "EXPIRED" => Ok(Self::Expired),
            "FAILED" => Ok(Self::Failed),
            "DELETED" => Ok(Self::Deleted),
            other => Err(format!("unknown rpc status: {other}")),
        }
    }
}

/// Transport-level delivery feedback for a pushed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Handed to the transport.
    Sent,
    /// The device acknowledged receipt.
    Delivered,
    /// The transport gave up waiting for the device's acknowledgement.
    Timeout,
}

impl DeliveryStatus {
    /// Durable status mirrored for persisted requests.
    pub fn as_rpc_status(self) -> RpcStatus {
        match self {
            Self::Sent => RpcStatus::Sent,
            Self::Delivered => RpcStatus::Delivered,
            Self::Timeout => RpcStatus::Timeout,
        }
    }
}

/// Method call carried by an RPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBody {
    pub method: String,
    /// Raw parameters as sent by the caller, usually JSON text.
    pub params: String,
}

/// A server-originated RPC addressed to one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToDeviceRpcRequest {
    pub id: RpcId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub oneway: bool,
    /// Absolute deadline, epoch milliseconds.
    pub expiration_time: i64,
    pub body: RpcBody,
    pub persisted: bool,
    /// Per-request retry budget, capped by the system maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

impl ToDeviceRpcRequest {
    /// Milliseconds left before the deadline, negative once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expiration_time - now_ms
    }

    /// Additional info as JSON. Text that does not parse is kept as a JSON string.
    pub fn additional_info_json(&self) -> Option<Value> {
        self.additional_info
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned())))
    }
}

/// Final outcome delivered to whoever submitted an RPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: RpcId, payload: Option<String>) -> Self {
        Self {
            id,
            payload,
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: RpcError) -> Self {
        Self {
            id,
            payload: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Row of the durable RPC audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRecord {
    pub id: RpcId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub request: ToDeviceRpcRequest,
    pub status: RpcStatus,
    pub expiration_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Value>,
    pub created_time: i64,
}

impl RpcRecord {
    /// Fresh record for `request` in `status`.
    pub fn new(request: &ToDeviceRpcRequest, status: RpcStatus, created_time: i64) -> Self {
        Self {
            id: request.id.clone(),
            tenant_id: request.tenant_id.clone(),
            device_id: request.device_id.clone(),
            request: request.clone(),
            status,
            expiration_time: request.expiration_time,
            response: None,
            additional_info: request.additional_info_json(),
            created_time,
        }
    }
}

/// JSON stored for a device answer: the payload itself when it is valid
/// JSON, otherwise `{"error": <payload>}`.
pub fn response_to_json(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|_| serde_json::json!({ "error": payload }))
}
