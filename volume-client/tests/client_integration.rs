//! End-to-end tests against a real daemon and against misbehaving peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use volume_client::{ApiError, ClientConfig, Endpoint, StatusApi, VolumeClient};
use volume_daemon::{DaemonConfig, SoftwareBackend, VolumeServer};
use volume_protocol::{StatusPayload, StatusUpdate};

async fn start_daemon(config: DaemonConfig, volume: u8) -> VolumeServer {
    VolumeServer::start(&config, Arc::new(SoftwareBackend::with_volume(volume)))
        .await
        .expect("Failed to start daemon")
}

fn endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::new(addr.ip().to_string(), addr.port())
}

fn client() -> VolumeClient {
    VolumeClient::new(ClientConfig::default()).unwrap()
}

fn fast_client() -> VolumeClient {
    VolumeClient::new(ClientConfig {
        connect_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_millis(200),
    })
    .unwrap()
}

/// A peer that answers every connection with `response`, verbatim
async fn canned_peer(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// A peer that writes each chunk after its delay, in order
async fn staged_peer(stages: &'static [(u64, &'static str)]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                for (delay_ms, chunk) in stages {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    if stream.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

const OK_HEAD: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 31\r\nConnection: close\r\n\r\n";
const OK_BODY: &str = "{\"volume\": 42, \"muted\": false}\n";

#[tokio::test]
async fn test_status_round_trip() {
    let daemon = start_daemon(DaemonConfig::local(), 25).await;
    let den = endpoint(daemon.local_addr());
    let client = client();

    assert_eq!(
        client.get_status(&den).await.unwrap(),
        StatusPayload::new(25, false)
    );
    assert_eq!(
        client.set_volume(&den, 70).await.unwrap(),
        StatusPayload::new(70, false)
    );
    assert_eq!(
        client.set_muted(&den, true).await.unwrap(),
        StatusPayload::new(70, true)
    );

    let both = StatusUpdate {
        volume: Some(10),
        muted: Some(false),
    };
    assert_eq!(
        client.set_status(&den, &both).await.unwrap(),
        StatusPayload::new(10, false)
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_legacy_volume_calls() {
    let daemon = start_daemon(DaemonConfig::local(), 40).await;
    let den = endpoint(daemon.local_addr());
    let client = client();

    assert_eq!(client.get_volume(&den).await.unwrap(), 40);
    assert_eq!(client.set_legacy_volume(&den, 90).await.unwrap(), 90);
    assert_eq!(client.get_status(&den).await.unwrap().volume, 90);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_disabled_legacy_surface_is_remote_error() {
    let config = DaemonConfig::local().with_legacy_volume_endpoint(false);
    let daemon = start_daemon(config, 40).await;

    let err = client()
        .get_volume(&endpoint(daemon.local_addr()))
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::Remote("Not found".to_string()));
    assert_eq!(err.to_string(), "Not found");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_connection_refused() {
    // Grab a free port, then release it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client().get_status(&endpoint(addr)).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let err = fast_client().get_status(&endpoint(addr)).await.unwrap_err();
    assert_eq!(err, ApiError::Timeout);
}

#[tokio::test]
async fn test_non_200_status() {
    let addr = canned_peer(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;

    let err = client().get_status(&endpoint(addr)).await.unwrap_err();
    assert_eq!(err, ApiError::Http(503));
}

#[tokio::test]
async fn test_garbage_body() {
    let addr = canned_peer(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 6\r\nConnection: close\r\n\r\n<html>",
    )
    .await;

    let err = client().get_status(&endpoint(addr)).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_incomplete_status_body() {
    let addr = canned_peer(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 14\r\nConnection: close\r\n\r\n{\"volume\": 3}\n",
    )
    .await;

    let err = client().get_status(&endpoint(addr)).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_reply_after_read_timeout_is_timeout() {
    // A complete, valid reply that arrives 100 ms past the read deadline
    let addr = staged_peer(&[(300, OK_HEAD), (0, OK_BODY)]).await;

    let err = fast_client().get_status(&endpoint(addr)).await.unwrap_err();
    assert_eq!(err, ApiError::Timeout);
}

#[tokio::test]
async fn test_stalled_body_is_timeout() {
    let addr = staged_peer(&[(0, OK_HEAD), (300, OK_BODY)]).await;

    let err = fast_client().get_status(&endpoint(addr)).await.unwrap_err();
    assert_eq!(err, ApiError::Timeout);
}

#[tokio::test]
async fn test_reply_within_read_timeout_succeeds() {
    let addr = staged_peer(&[(50, OK_HEAD), (0, OK_BODY)]).await;

    assert_eq!(
        fast_client().get_status(&endpoint(addr)).await.unwrap(),
        StatusPayload::new(42, false)
    );
}
