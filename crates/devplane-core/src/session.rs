//! Transport session model and the snapshot persisted for session affinity.

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, SessionId};

/// How a session can be pushed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    /// Persistent connection, accepts repeated pushes.
    Async,
    /// One-shot request/response, consumed by its first push.
    Sync,
}

/// Where a session lives and how to talk to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_type: SessionType,
    pub node_id: NodeId,
}

impl SessionInfo {
    /// Persistent session hosted on `node_id`.
    pub fn persistent(node_id: NodeId) -> Self {
        Self {
            session_type: SessionType::Async,
            node_id,
        }
    }

    /// One-shot session hosted on `node_id`.
    pub fn one_shot(node_id: NodeId) -> Self {
        Self {
            session_type: SessionType::Sync,
            node_id,
        }
    }

    pub fn is_sync(&self) -> bool {
        self.session_type == SessionType::Sync
    }
}

/// Reason carried by a session-close notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionCloseReason {
    Unknown,
    CredentialsUpdated,
    MaxSessionsLimitReached,
    SessionTimeout,
    RpcDeliveryTimeout,
}

impl SessionCloseReason {
    /// Human-readable message sent alongside the close.
    pub fn message(self) -> &'static str {
        match self {
            Self::Unknown => "Session closed",
            Self::CredentialsUpdated => "device credentials updated",
            Self::MaxSessionsLimitReached => "max concurrent sessions limit reached per device",
            Self::SessionTimeout => "session timeout",
            Self::RpcDeliveryTimeout => "rpc delivery timeout",
        }
    }
}

/// One entry of the checkpointed session snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshotEntry {
    pub session_id: SessionId,
    pub node_id: NodeId,
    pub last_activity_time: i64,
    pub subscribed_to_attributes: bool,
    pub subscribed_to_rpc: bool,
}

/// Per-device list of persistent sessions, written to the shared cache so
/// another node can reclaim them after a handover.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub sessions: Vec<SessionSnapshotEntry>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
