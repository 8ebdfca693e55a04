//! In-memory network simulation for Tether
//!
//! Provides `ChannelTransport`, a `Transport` impl using tokio channels and
//! duplex pipes, so multi-peer session tests run without real networking.

mod channel_transport;

pub use channel_transport::{ChannelBiStream, ChannelConnection, ChannelNetwork, ChannelTransport};
