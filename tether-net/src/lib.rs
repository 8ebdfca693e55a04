//! Tether Networking
//!
//! Request/reply RPC between peers:
//! - **Framing**: length-delimited prost messages over any transport stream
//! - **Client**: one stream per call, with timeout and cancellation
//! - **Server**: service-name routing of inbound requests to handlers
//! - **TCP**: a plain TCP `Transport` for real deployments

pub mod client;
pub mod error;
pub mod framing;
pub mod proto;
pub mod server;
pub mod tcp;

pub use client::RpcClient;
pub use error::RpcError;
pub use framing::{MessageSink, MessageStream};
pub use proto::{failure_code, Failure, RpcRequest, RpcResponse};
pub use server::{RpcHandler, RpcServer};
pub use tcp::TcpTransport;
