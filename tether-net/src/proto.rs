//! RPC envelope messages.
//!
//! Every call is one `RpcRequest` answered by one `RpcResponse` on a fresh stream.
//! Service payloads are opaque bytes encoded by the service itself.

/// Failure codes understood across the mesh.
pub mod failure_code {
    pub const NOT_FOUND: &str = "not-found";
    pub const STALE_UPDATE: &str = "stale-update";
    pub const STALE_FETCH: &str = "stale-fetch";
    pub const FROZEN_ATTRIBUTES: &str = "frozen-attributes";
    pub const FUTURE_REVISION: &str = "future-revision";
    pub const INVALID_NAMESPACE: &str = "invalid-namespace";
    pub const BAD_REQUEST: &str = "bad-request";
    pub const UNKNOWN_SERVICE: &str = "unknown-service";
    pub const UNKNOWN_METHOD: &str = "unknown-method";
    pub const INTERNAL: &str = "internal";
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcRequest {
    #[prost(uint64, tag = "1")]
    pub id: u64,

    #[prost(string, tag = "2")]
    pub service: String,

    #[prost(string, tag = "3")]
    pub method: String,

    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcResponse {
    #[prost(uint64, tag = "1")]
    pub id: u64,

    #[prost(oneof = "rpc_response::Outcome", tags = "2, 3")]
    pub outcome: Option<rpc_response::Outcome>,
}

pub mod rpc_response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Outcome {
        #[prost(bytes = "vec", tag = "2")]
        Payload(Vec<u8>),

        #[prost(message, tag = "3")]
        Failure(super::Failure),
    }
}

/// Application-level failure returned by a handler.
///
/// `revision` and `keys` carry the context needed to rebuild typed errors
/// on the calling side; they are left empty when not relevant.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Failure {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(string, tag = "2")]
    pub message: String,

    #[prost(uint32, tag = "3")]
    pub revision: u32,

    #[prost(string, repeated, tag = "4")]
    pub keys: Vec<String>,
}

impl Failure {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            revision: 0,
            keys: Vec::new(),
        }
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl RpcResponse {
    pub fn payload(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            outcome: Some(rpc_response::Outcome::Payload(payload)),
        }
    }

    pub fn failure(id: u64, failure: Failure) -> Self {
        Self {
            id,
            outcome: Some(rpc_response::Outcome::Failure(failure)),
        }
    }
}
