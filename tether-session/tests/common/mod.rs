// Each integration test compiles as a separate binary that includes this module via `mod common;`.
// Not every test binary uses every helper, so Rust emits spurious dead_code warnings.
#![allow(dead_code)]
//! Shared fixtures for tether-session integration tests.

use std::time::Duration;
use tether_model::{Namespace, PeerId};
use tether_net_sim::{ChannelNetwork, ChannelTransport};
use tether_session::{Peer, SessionConfig};

pub fn ns(name: &str) -> Namespace {
    Namespace::new(name).expect("valid namespace")
}

/// Config with timeouts short enough for failing tests to fail fast.
pub fn test_config() -> SessionConfig {
    SessionConfig::default()
        .with_rpc_timeout(Duration::from_secs(2))
        .with_stream_idle_timeout(Duration::from_secs(2))
}

/// Two peers on one in-memory network. `owner` creates sessions, `viewer` reaches them remotely.
pub struct TestPair {
    pub owner: Peer<ChannelTransport>,
    pub viewer: Peer<ChannelTransport>,
    pub net: ChannelNetwork,
}

impl TestPair {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: SessionConfig) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let net = ChannelNetwork::new();
        let owner = Peer::builder(ChannelTransport::new(PeerId([0xa1; 16]), &net).await)
            .with_config(config.clone())
            .build();
        let viewer = Peer::builder(ChannelTransport::new(PeerId([0xb2; 16]), &net).await)
            .with_config(config)
            .build();
        Self { owner, viewer, net }
    }

    pub async fn shutdown(self) {
        self.viewer.dispose().await;
        self.owner.dispose().await;
    }
}
