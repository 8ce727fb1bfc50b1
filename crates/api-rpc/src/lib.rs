//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 control surface of the rollup engine:
//! `rollup.put.v1`, `rollup.get.v1`, `rollup.start.v1`, `rollup.stop.v1`
//! and `metadata.get.v1`.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
