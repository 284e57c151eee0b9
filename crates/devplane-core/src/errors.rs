use serde::{Deserialize, Serialize};

/// Caller-visible failure of a server-to-device RPC.
///
/// Every failed request resolves to exactly one of these, delivered through
/// the same responder channel as a successful answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcError {
    /// The request arrived after its deadline.
    #[error("request expired before dispatch")]
    Expired,
    /// The deadline passed without the request reaching any session.
    #[error("no active connection to the device")]
    NoActiveConnection,
    /// The request was pushed but never acknowledged before its deadline.
    #[error("timed out waiting for the device")]
    Timeout,
    /// Transport delivery kept timing out past the retry cap.
    #[error("There was a Timeout and all retry attempts have been exhausted. Retry attempts set: {0}")]
    RetriesExhausted(u32),
    /// Delivered but the device never answered.
    #[error("There was a timeout awaiting for RPC response from device.")]
    NoResponse,
    /// Removed by an operator before it completed.
    #[error("request was deleted")]
    Deleted,
    /// The device answered with an error.
    #[error("device error: {0}")]
    Device(String),
}

impl RpcError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::NoActiveConnection => "no_active_connection",
            Self::Timeout => "timeout",
            Self::RetriesExhausted(_) => "retries_exhausted",
            Self::NoResponse => "no_response",
            Self::Deleted => "deleted",
            Self::Device(_) => "device_error",
        }
    }

    /// Whether the device never got to see the request.
    pub fn is_undelivered(&self) -> bool {
        matches!(self, Self::Expired | Self::NoActiveConnection)
    }
}

/// Failure reported by an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(RpcError::Expired.error_kind(), "expired");
        assert_eq!(RpcError::RetriesExhausted(5).error_kind(), "retries_exhausted");
        assert_eq!(RpcError::Device("boom".into()).error_kind(), "device_error");
    }

    #[test]
    fn retry_message_carries_budget() {
        let msg = RpcError::RetriesExhausted(3).to_string();
        assert!(msg.ends_with("Retry attempts set: 3"), "got: {msg}");
    }

    #[test]
    fn undelivered_classification() {
        assert!(RpcError::Expired.is_undelivered());
        assert!(RpcError::NoActiveConnection.is_undelivered());
        assert!(!RpcError::Timeout.is_undelivered());
        assert!(!RpcError::NoResponse.is_undelivered());
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&RpcError::NoActiveConnection).unwrap();
        assert_eq!(json, "\"NO_ACTIVE_CONNECTION\"");
    }
}
