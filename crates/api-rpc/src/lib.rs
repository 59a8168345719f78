//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for the Storybench daemon: job
//! registration, start, status, cancel, progress subscriptions and the
//! admin surface.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use jsonrpsee::server::ServerHandle;
pub use server::{RpcServer, RpcServerConfig};
