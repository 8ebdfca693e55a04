//! Error types for tether-net crate

use crate::proto::Failure;
use std::time::Duration;
use tether_net_types::TransportError;
use thiserror::Error;

/// Errors of a single RPC exchange
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The remote handler answered with an application failure.
    #[error("Remote failure {0}")]
    Failure(Failure),

    #[error("Stream closed before a reply arrived")]
    Closed,

    #[error("Reply id {got} does not match request {expected}")]
    Mismatch { expected: u64, got: u64 },

    #[error("Reply carries no outcome")]
    EmptyReply,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}
