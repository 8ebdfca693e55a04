//! RPC client/server exchanges over the in-memory transport.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tether_model::PeerId;
use tether_net::{failure_code, Failure, RpcClient, RpcError, RpcHandler, RpcServer};
use tether_net_sim::{ChannelNetwork, ChannelTransport};
use tokio_util::sync::CancellationToken;

/// Handler whose behaviour is picked by method name.
struct Scripted;

#[async_trait]
impl RpcHandler for Scripted {
    async fn handle(&self, remote: PeerId, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, Failure> {
        match method {
            "echo" => Ok(payload),
            "whoami" => Ok(remote.as_bytes().to_vec()),
            "stall" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
            _ => Err(Failure::new(failure_code::NOT_FOUND, "nothing here")
                .with_revision(7)
                .with_keys(vec!["a".into()])),
        }
    }
}

async fn pair(timeout: Duration) -> (RpcClient<ChannelTransport>, PeerId, CancellationToken, ChannelNetwork) {
    let _ = tracing_subscriber::fmt::try_init();
    let net = ChannelNetwork::new();
    let a = ChannelTransport::new(PeerId([1; 16]), &net).await;
    let b = ChannelTransport::new(PeerId([2; 16]), &net).await;

    let cancel = CancellationToken::new();
    let server = RpcServer::new(Duration::from_secs(5));
    server.register("test", Arc::new(Scripted));
    server.spawn(b.clone(), cancel.clone());

    (RpcClient::new(a, timeout), PeerId([2; 16]), cancel, net)
}

#[tokio::test]
async fn test_call_round_trip() {
    let (client, server_peer, cancel, _net) = pair(Duration::from_secs(5)).await;

    let reply = client.call(&server_peer, "test", "echo", b"hello".to_vec(), &cancel).await.unwrap();
    assert_eq!(reply, b"hello");

    let reply = client.call(&server_peer, "test", "whoami", Vec::new(), &cancel).await.unwrap();
    assert_eq!(reply, PeerId([1; 16]).as_bytes().to_vec());
}

#[tokio::test]
async fn test_concurrent_calls_do_not_interfere() {
    let (client, server_peer, cancel, _net) = pair(Duration::from_secs(5)).await;

    let calls = (0..16u8).map(|i| {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let reply = client.call(&server_peer, "test", "echo", vec![i], &cancel).await.unwrap();
            assert_eq!(reply, vec![i]);
        })
    });
    for call in calls {
        call.await.unwrap();
    }
}

#[tokio::test]
async fn test_failure_is_carried_back() {
    let (client, server_peer, cancel, _net) = pair(Duration::from_secs(5)).await;

    match client.call(&server_peer, "test", "missing", Vec::new(), &cancel).await {
        Err(RpcError::Failure(f)) => {
            assert_eq!(f.code, failure_code::NOT_FOUND);
            assert_eq!(f.revision, 7);
            assert_eq!(f.keys, vec!["a".to_string()]);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    match client.call(&server_peer, "nope", "echo", Vec::new(), &cancel).await {
        Err(RpcError::Failure(f)) => assert_eq!(f.code, failure_code::UNKNOWN_SERVICE),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout() {
    let (client, server_peer, cancel, _net) = pair(Duration::from_millis(100)).await;

    let err = client.call(&server_peer, "test", "stall", Vec::new(), &cancel).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_cancellation() {
    let (client, server_peer, _server_cancel, _net) = pair(Duration::from_secs(30)).await;
    let cancel = CancellationToken::new();

    let call_cancel = cancel.clone();
    let call = tokio::spawn(async move {
        client.call(&server_peer, "test", "stall", Vec::new(), &call_cancel).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Cancelled), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_peer_is_transport_error() {
    let (client, server_peer, cancel, net) = pair(Duration::from_secs(5)).await;
    net.remove(&server_peer).await;

    let err = client.call(&server_peer, "test", "echo", Vec::new(), &cancel).await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)), "got {:?}", err);
}
