//! SQLite reference implementations of the durable collaborators: the RPC
//! audit log ([`RpcRepo`]) and the session snapshot cache
//! ([`SessionCacheRepo`]).

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod rpc_log;
pub mod schema;
pub mod session_cache;

pub use database::Database;
pub use error::StoreError;
pub use rpc_log::RpcRepo;
pub use session_cache::SessionCacheRepo;
