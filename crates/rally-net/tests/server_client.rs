//! End-to-end behaviour of `GameServer` and `GameClient` over loopback TCP.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rally_net::{
    ClientConfig, ClientEvent, DisconnectReason, GameClient, GameServer, PeerId, ServerConfig,
    ServerEvent,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        bind_port: 0,
        ..Default::default()
    }
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_address: addr.ip().to_string(),
        server_port: addr.port(),
        ..Default::default()
    }
}

async fn recv<T>(events: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn connected_peer(events: &mut UnboundedReceiver<ServerEvent>) -> PeerId {
    match recv(events).await {
        ServerEvent::Connected(peer) => peer,
        other => panic!("expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_round_trip_both_directions() {
    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();

    let (client, mut client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    assert_eq!(recv(&mut client_events).await, ClientEvent::Connected);
    let peer = connected_peer(&mut server_events).await;

    client.send_text("Player Connected").await.unwrap();
    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Data(peer.clone(), b"Player Connected".to_vec())
    );

    server.send_text(&peer, "42.5").await.unwrap();
    assert_eq!(
        recv(&mut client_events).await,
        ClientEvent::Data(b"42.5".to_vec())
    );
}

#[tokio::test]
async fn test_binary_payload_arrives_verbatim() {
    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();
    let (client, _client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    let peer = connected_peer(&mut server_events).await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    client.send(&payload).await.unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        match recv(&mut server_events).await {
            ServerEvent::Data(from, bytes) => {
                assert_eq!(from, peer);
                assert!(bytes.len() <= rally_net::DEFAULT_RECEIVE_BUFFER);
                received.extend_from_slice(&bytes);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_client_disconnect_reports_normal() {
    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();
    let (client, _client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    let peer = connected_peer(&mut server_events).await;
    assert!(server.clients().await.contains(&peer));

    client.disconnect().await;
    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Disconnected(peer.clone(), DisconnectReason::Normal)
    );
    assert!(!server.clients().await.contains(&peer));
}

#[tokio::test]
async fn test_kick_then_send_is_noop() {
    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();
    let (client, mut client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    assert_eq!(recv(&mut client_events).await, ClientEvent::Connected);
    let peer = connected_peer(&mut server_events).await;

    server.disconnect_client(&peer).await;
    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Disconnected(peer.clone(), DisconnectReason::Kicked)
    );
    assert!(server.send_text(&peer, "42.5").await.is_ok());
    assert!(!server.is_connected(&peer).await);

    assert_eq!(recv(&mut client_events).await, ClientEvent::Disconnected);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_idle_peer_times_out() {
    let config = ServerConfig {
        idle_timeout_secs: 2,
        idle_check_interval_ms: 100,
        ..server_config()
    };
    let (server, mut server_events) = GameServer::new(config).unwrap();
    let addr = server.start().await.unwrap();
    let (_client, _client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    let peer = connected_peer(&mut server_events).await;
    let connected_at = Instant::now();

    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Disconnected(peer.clone(), DisconnectReason::Timeout)
    );
    assert!(connected_at.elapsed() >= Duration::from_millis(1900));
    assert!(!server.clients().await.contains(&peer));
}

#[tokio::test]
async fn test_idle_timeout_fires_during_stalled_send() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        idle_check_interval_ms: 100,
        ..server_config()
    };
    let (server, mut server_events) = GameServer::new(config).unwrap();
    let server = Arc::new(server);
    let addr = server.start().await.unwrap();

    // Never reads, so a large send fills the socket and parks.
    let _silent = TcpStream::connect(addr).await.unwrap();
    let peer = connected_peer(&mut server_events).await;
    let sender = {
        let server = Arc::clone(&server);
        let peer = peer.clone();
        tokio::spawn(async move { server.send(&peer, &vec![0u8; 64 * 1024 * 1024]).await })
    };

    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Disconnected(peer, DisconnectReason::Timeout)
    );
    tokio::time::timeout(Duration::from_secs(3), sender)
        .await
        .expect("stalled send never returned")
        .unwrap()
        .unwrap();

    // The sweep keeps running after tearing down a blocked writer.
    let _late = TcpStream::connect(addr).await.unwrap();
    let late_peer = connected_peer(&mut server_events).await;
    assert_eq!(
        recv(&mut server_events).await,
        ServerEvent::Disconnected(late_peer, DisconnectReason::Timeout)
    );
}

#[tokio::test]
async fn test_active_peer_is_not_timed_out() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        idle_check_interval_ms: 100,
        ..server_config()
    };
    let (server, mut server_events) = GameServer::new(config).unwrap();
    let addr = server.start().await.unwrap();
    let (client, _client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    let peer = connected_peer(&mut server_events).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        client.send_text("ping").await.unwrap();
    }
    assert!(server.is_connected(&peer).await);
}

#[tokio::test]
async fn test_idle_timeout_disabled_keeps_silent_peer() {
    let config = ServerConfig {
        idle_timeout_secs: 0,
        idle_check_interval_ms: 50,
        ..server_config()
    };
    let (server, mut server_events) = GameServer::new(config).unwrap();
    let addr = server.start().await.unwrap();
    let (_client, _client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    let peer = connected_peer(&mut server_events).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(server.is_connected(&peer).await);
}

#[tokio::test]
async fn test_concurrent_sends_do_not_interleave() {
    const WRITERS: u8 = 8;
    const BLOCK: usize = 2048;

    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let server = Arc::new(server);
    let addr = server.start().await.unwrap();
    let (_client, mut client_events) = GameClient::connect(client_config(addr)).await.unwrap();
    assert_eq!(recv(&mut client_events).await, ClientEvent::Connected);
    let peer = connected_peer(&mut server_events).await;

    let mut tasks = Vec::new();
    for writer in 0..WRITERS {
        let server = Arc::clone(&server);
        let peer = peer.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                server.send(&peer, &[writer; BLOCK]).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = WRITERS as usize * 10 * BLOCK;
    let mut stream = Vec::with_capacity(total);
    while stream.len() < total {
        match recv(&mut client_events).await {
            ClientEvent::Data(bytes) => stream.extend_from_slice(&bytes),
            other => panic!("unexpected event {other:?}"),
        }
    }
    for block in stream.chunks(BLOCK) {
        assert!(
            block.iter().all(|b| *b == block[0]),
            "writes from different senders interleaved"
        );
    }
}

#[tokio::test]
async fn test_each_connection_gets_one_terminal_event() {
    let (server, mut server_events) = GameServer::new(server_config()).unwrap();
    let addr = server.start().await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(GameClient::connect(client_config(addr)).await.unwrap());
    }
    let mut peers = HashSet::new();
    for _ in 0..3 {
        peers.insert(connected_peer(&mut server_events).await);
    }
    let kicked = peers.iter().next().cloned().unwrap();

    server.disconnect_client(&kicked).await;
    for (client, _) in &clients {
        client.disconnect().await;
    }

    let mut ended = HashSet::new();
    for _ in 0..3 {
        match recv(&mut server_events).await {
            ServerEvent::Disconnected(peer, reason) => {
                if peer == kicked {
                    assert_eq!(reason, DisconnectReason::Kicked);
                } else {
                    assert_eq!(reason, DisconnectReason::Normal);
                }
                assert!(ended.insert(peer), "duplicate Disconnected event");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(ended, peers);
    assert!(server.clients().await.is_empty());

    let extra = tokio::time::timeout(Duration::from_millis(300), server_events.recv()).await;
    assert!(extra.is_err(), "no further events expected");
}
