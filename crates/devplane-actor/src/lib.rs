//! # devplane-actor
//!
//! One actor per device. The actor owns the device's transport sessions,
//! its attribute and RPC subscribers and its queue of server-to-device RPCs,
//! and processes everything that touches that state one message at a time.
//!
//! - [`DeviceActor::start`] loads the device, restores checkpointed sessions
//!   and queued RPCs, then spawns the actor task.
//! - [`DeviceActorHandle`] enqueues [`DeviceMsg`]s without blocking.
//! - [`DeviceRegistry`] starts actors on demand and routes messages to them.
//!
//! Collaborators (directory, attribute store, audit log, transport, ...) are
//! injected through [`ActorServices`].

#![deny(unsafe_code)]

mod actor;
pub mod error;
mod messages;
mod pending;
mod processor;
mod registry;
mod services;
mod session_table;
mod strategy;
mod subscriptions;
mod timers;
mod writer;

#[cfg(test)]
mod test_support;

pub use actor::{DeviceActor, DeviceActorHandle};
pub use error::ActorError;
pub use messages::DeviceMsg;
pub use registry::DeviceRegistry;
pub use services::ActorServices;
