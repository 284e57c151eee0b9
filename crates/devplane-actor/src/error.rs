use devplane_core::ids::DeviceId;
use devplane_core::PortError;

/// Errors surfaced to whoever starts or talks to a device actor.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The device record is missing, so the actor cannot run.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("collaborator failure: {0}")]
    Port(#[from] PortError),

    #[error("mailbox of device {0} is closed")]
    MailboxClosed(DeviceId),
}

impl ActorError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device_not_found",
            Self::Port(_) => "port",
            Self::MailboxClosed(_) => "mailbox_closed",
        }
    }
}
