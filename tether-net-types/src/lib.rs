//! Tether Net Types
//!
//! Transport abstraction shared by the RPC layer (`tether-net`) and the
//! concrete transports (TCP in `tether-net`, in-memory in `tether-net-sim`).

pub mod transport;

pub use transport::{BiStream, Connection, Transport, TransportError};
