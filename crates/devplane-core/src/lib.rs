//! # devplane-core
//!
//! Domain types shared by every devplane crate: branded identifiers, session
//! and RPC models, the messages exchanged with the transport layer, and the
//! collaborator ports a device actor talks to.

#![deny(unsafe_code)]

pub mod attributes;
pub mod clock;
pub mod credentials;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod ports;
pub mod rpc;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{PortError, RpcError};
pub use ids::{DeviceId, EdgeId, NodeId, RpcId, SessionId, TenantId};
