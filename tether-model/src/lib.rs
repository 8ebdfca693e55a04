//! Tether Model
//!
//! Pure data types for revisioned session attributes, decoupled from
//! the transport, the RPC layer and the session runtime.

pub mod attr;
pub mod error;
pub mod types;

// Re-exports
pub use attr::{Attr, Catalog, Diff, Namespace, Table, VAttr, Visibility};
pub use error::SessionError;
pub use types::{PeerId, Ref, RevisionNumber, SessionId, PEER_ID_LEN};
