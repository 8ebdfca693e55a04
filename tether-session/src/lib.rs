//! Tether Sessions
//!
//! Revisioned session attributes shared across peers:
//! - **State**: the authoritative catalog on the owning peer
//! - **RemoteSession**: read-through cache on every other peer
//! - **SessionClient / SessionServer**: the `session` RPC service between them
//! - **RemoteSessionStore**: mark-and-sweep eviction of idle caches
//! - **Revision**: one handle type for local, remote and destroyed sessions
//! - **Peer**: owns all of the above for one process

pub mod client;
pub mod config;
pub mod local;
pub mod peer;
pub mod proto;
pub mod remote;
pub mod revision;
pub mod rpc;
pub mod server;
pub mod state;
pub mod store;

pub use client::SessionClient;
pub use config::SessionConfig;
pub use local::LocalSessions;
pub use peer::{Peer, PeerBuilder};
pub use remote::RemoteSession;
pub use revision::Revision;
pub use rpc::{FetchReply, SessionRpc, UpdateReply};
pub use server::SessionServer;
pub use state::{Snapshot, State};
pub use store::RemoteSessionStore;

pub use tether_model::{Attr, Namespace, PeerId, Ref, RevisionNumber, SessionError, SessionId};
