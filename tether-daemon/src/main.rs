//! Tether Daemon (`tetherd`)
//!
//! Headless process that owns a peer, serves its sessions over TCP and
//! caches the remote sessions it is asked about.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tether_model::PeerId;
use tether_net::TcpTransport;
use tether_session::{Peer, SessionConfig};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tetherd", version, about = "Tether session peer daemon")]
struct Args {
    /// Address to accept peer connections on
    #[arg(long, default_value = "127.0.0.1:7420")]
    listen: SocketAddr,

    /// Peer id as 32 hex characters (random if omitted)
    #[arg(long, value_parser = parse_peer_id)]
    peer_id: Option<PeerId>,

    /// Known peer as `<peer-id-hex>@<address>` (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<(PeerId, SocketAddr)>,

    /// Seconds between sweeps of the remote session cache
    #[arg(long, default_value_t = 60)]
    prune_interval_secs: u64,

    /// Raise the log level (-v debug, -vv trace); ignored when RUST_LOG is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_peer_id(s: &str) -> Result<PeerId, String> {
    PeerId::from_hex(s)
}

fn parse_peer(s: &str) -> Result<(PeerId, SocketAddr), String> {
    let (id, addr) = s
        .split_once('@')
        .ok_or_else(|| format!("expected <peer-id>@<address>, got {:?}", s))?;
    let addr = addr.parse().map_err(|e| format!("bad address {:?}: {}", addr, e))?;
    Ok((parse_peer_id(id)?, addr))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tetherd starting");

    let peer_id = args.peer_id.unwrap_or_else(PeerId::random);
    let transport = TcpTransport::bind(peer_id, args.listen).await.map_err(|e| {
        tracing::error!("Failed to listen on {}: {}", args.listen, e);
        anyhow::anyhow!("{}", e)
    })?;
    for (peer, addr) in &args.peers {
        transport.add_peer(*peer, *addr);
        tracing::debug!(peer = %peer.fmt_short(), %addr, "Known peer");
    }

    let config = SessionConfig::default().with_prune_interval(Duration::from_secs(args.prune_interval_secs.max(1)));
    let peer = Peer::builder(transport).with_config(config).build();

    tracing::info!(
        peer = %hex::encode(peer.id().as_bytes()),
        addr = %peer.transport().local_addr()?,
        known_peers = args.peers.len(),
        "Serving sessions"
    );

    shutdown_signal().await?;
    tracing::info!("Stopping peer");
    peer.dispose().await;
    tracing::info!("tetherd stopped");
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // RUST_LOG wins over -v.
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        let mut sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;
        let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let id = PeerId([0xab; 16]);
        let (parsed, addr) = parse_peer(&format!("{}@127.0.0.1:9000", hex::encode(id.as_bytes()))).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(addr.port(), 9000);

        assert!(parse_peer("no-at-sign").is_err());
        assert!(parse_peer("abcd@127.0.0.1:9000").is_err());
        assert!(parse_peer(&format!("{}@nowhere", hex::encode(id.as_bytes()))).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["tetherd", "--listen", "0.0.0.0:1", "-vv", "--prune-interval-secs", "5"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.prune_interval_secs, 5);
        assert!(args.peers.is_empty());
        assert!(args.peer_id.is_none());
    }
}
