// ============================================
// File: crates/quicvc-node/tests/connection.rs
// ============================================
//! Loopback tests for header-framed QUICVC connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use quicvc_common::time::Timestamp;
use quicvc_common::types::{Challenge, ConnectionId};
use quicvc_core::credential::{CredentialEngine, Invitation, TrustLevel};
use quicvc_core::error::CredentialError;
use quicvc_core::protocol::{encode_frames, encode_packet, Frame, PacketHeader, PacketType};
use quicvc_node::{
    ConnectionEvent, ConnectionManager, ConnectionState, NodeConfig, NodeError, NodeEvent,
    QuicVcListener,
};

const WAIT: Duration = Duration::from_secs(3);
const TOKEN: &str = "abc123";

fn invitation(inviter_key: &str) -> Invitation {
    Invitation::new(TOKEN, inviter_key.repeat(32), "wss://broker")
}

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.handshake.timeout_ms = 2000;
    config
}

async fn start_listener(device_id: &str) -> QuicVcListener {
    QuicVcListener::bind(test_config(), Arc::new(CredentialEngine::new(device_id)))
        .await
        .unwrap()
}

fn client(device_id: &str, config: NodeConfig) -> ConnectionManager {
    ConnectionManager::new(config, Arc::new(CredentialEngine::new(device_id)))
}

#[tokio::test]
async fn test_handshake_and_stream_delivery() {
    let listener = start_listener("server").await;
    let addr = listener.local_addr().unwrap();
    let manager = client("client", test_config());

    let mut outbound = manager.connect(addr).await.unwrap();
    assert_eq!(outbound.remote_device_id(), Some("server"));
    assert_eq!(manager.state(outbound.id()), Some(ConnectionState::Established));
    assert_eq!(
        outbound.next().await,
        Some(ConnectionEvent::Connected {
            device_id: "server".into()
        })
    );

    let mut inbound = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(inbound.remote_device_id(), Some("client"));
    assert_eq!(listener.state(inbound.id()), Some(ConnectionState::Established));

    manager.send(outbound.id(), b"hello server").await.unwrap();
    let data = timeout(WAIT, inbound.next_data()).await.unwrap().unwrap();
    assert_eq!(&data[..], b"hello server");

    listener.send(inbound.id(), b"hello client").await.unwrap();
    let data = timeout(WAIT, outbound.next_data()).await.unwrap().unwrap();
    assert_eq!(&data[..], b"hello client");
}

#[tokio::test]
async fn test_both_sides_record_verified_peer() {
    let listener = start_listener("server").await;
    let mut server_events = listener.subscribe();
    let manager = client("client", test_config());

    let stream = manager.connect(listener.local_addr().unwrap()).await.unwrap();
    let _inbound = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    let peer = manager.engine().get_verified_peer("server").unwrap();
    assert_eq!(peer.trust_level, TrustLevel::Direct);
    assert!(listener.engine().is_peer_verified("client"));

    let authenticated = timeout(WAIT, async {
        loop {
            if let Ok(NodeEvent::PeerAuthenticated(peer)) = server_events.recv().await {
                return peer;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(authenticated.device_id, "client");

    manager.close(stream.id()).await;
}

#[tokio::test]
async fn test_send_to_unknown_connection() {
    let manager = client("client", test_config());
    let err = manager
        .send(ConnectionId::generate(), b"nobody")
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NoConnection(_)));
}

#[tokio::test]
async fn test_handshake_timeout_against_silent_peer() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let mut config = test_config();
    config.handshake.timeout_ms = 300;
    let manager = client("client", config);

    let dialer = manager.clone();
    let started = Instant::now();
    let pending = tokio::spawn(async move { dialer.connect(silent_addr).await });

    let id = timeout(WAIT, async {
        loop {
            if let Some(id) = manager.connection_ids().first() {
                return *id;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = manager.send(id, b"too early").await.unwrap_err();
    assert!(matches!(err, NodeError::NotEstablished(_)));

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, NodeError::HandshakeTimeout { timeout_ms: 300 }));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(manager.connection_ids().is_empty());

    // The silent peer did receive exactly the INITIAL.
    let mut buf = [0u8; 2048];
    let (len, _) = timeout(WAIT, silent.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf[0], 0x00);
    assert!(len > 15);
}

#[tokio::test]
async fn test_rejected_server_credential_fails_connect() {
    let server_engine = Arc::new(CredentialEngine::new("server"));
    let mut forged = server_engine.create_self_signed_credential().unwrap();
    forged.credential_subject.device_id = "someone-else".into();
    server_engine.set_local_credential(forged);

    let listener = QuicVcListener::bind(test_config(), server_engine).await.unwrap();
    let manager = client("client", test_config());

    let started = Instant::now();
    let err = manager
        .connect(listener.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::CredentialVerification(_)));
    // Fails on the response, not on the timeout.
    assert!(started.elapsed() < Duration::from_millis(2000));
    assert!(!manager.engine().is_peer_verified("someone-else"));
}

#[tokio::test]
async fn test_rejected_client_credential_times_out() {
    let listener = start_listener("server").await;
    let mut server_events = listener.subscribe();

    let engine = Arc::new(CredentialEngine::new("client"));
    let mut forged = engine.create_self_signed_credential().unwrap();
    forged.credential_subject.device_id = "admin".into();
    engine.set_local_credential(forged);

    let mut config = test_config();
    config.handshake.timeout_ms = 300;
    let manager = ConnectionManager::new(config, engine);

    let err = manager
        .connect(listener.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::HandshakeTimeout { .. }));
    assert!(!listener.engine().is_peer_verified("admin"));

    let event = timeout(WAIT, server_events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, NodeEvent::Error { connection: None, .. }));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let listener = start_listener("server").await;
    let manager = client("client", test_config());
    let mut events = manager.subscribe();

    let mut stream = manager.connect(listener.local_addr().unwrap()).await.unwrap();
    let id = stream.id();

    manager.close(id).await;
    manager.close(id).await;
    manager.close(ConnectionId::generate()).await;

    assert_eq!(manager.state(id), None);
    assert!(matches!(
        manager.send(id, b"gone").await,
        Err(NodeError::NoConnection(_))
    ));

    let mut seen = Vec::new();
    while let Some(event) = timeout(WAIT, stream.next()).await.unwrap() {
        let closed = event == ConnectionEvent::Closed;
        seen.push(event);
        if closed {
            break;
        }
    }
    assert_eq!(seen.last(), Some(&ConnectionEvent::Closed));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ConnectionEvent::Error { .. })));

    let closed = timeout(WAIT, async {
        loop {
            if let Ok(NodeEvent::Closed { connection, device_id }) = events.recv().await {
                return (connection, device_id);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(closed, (id, Some("server".to_string())));
}

#[tokio::test]
async fn test_connection_limit() {
    let listener = start_listener("server").await;
    let mut config = test_config();
    config.limits.max_connections = 1;
    let manager = client("client", config);

    let _first = manager.connect(listener.local_addr().unwrap()).await.unwrap();
    let err = manager
        .connect(listener.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::ConnectionLimitReached { limit: 1 }));
}

#[tokio::test]
async fn test_heartbeats_keep_connection_alive() {
    let mut config = test_config();
    config.heartbeat.interval_secs = 1;
    config.heartbeat.idle_timeout_secs = 2;

    let listener = QuicVcListener::bind(config.clone(), Arc::new(CredentialEngine::new("server")))
        .await
        .unwrap();
    let manager = client("client", config);
    let stream = manager.connect(listener.local_addr().unwrap()).await.unwrap();
    let inbound = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    // Past the idle timeout; only heartbeats carry traffic.
    sleep(Duration::from_millis(3500)).await;

    assert_eq!(manager.state(stream.id()), Some(ConnectionState::Established));
    assert_eq!(listener.state(inbound.id()), Some(ConnectionState::Established));
}

#[tokio::test]
async fn test_idle_connection_closes() {
    let mut config = test_config();
    config.heartbeat.interval_secs = 1;
    config.heartbeat.idle_timeout_secs = 2;

    let listener = start_listener("server").await;
    let manager = client("client", config);
    let mut stream = manager.connect(listener.local_addr().unwrap()).await.unwrap();

    // Nobody answers heartbeats any more.
    listener.shutdown().await.unwrap();

    let mut saw_error = false;
    while let Some(event) = timeout(Duration::from_secs(6), stream.next()).await.unwrap() {
        match event {
            ConnectionEvent::Error { .. } => saw_error = true,
            ConnectionEvent::Closed => break,
            _ => {}
        }
    }
    assert!(saw_error);
    assert_eq!(manager.state(stream.id()), None);
}

#[tokio::test]
async fn test_accept_returns_none_after_shutdown() {
    let listener = start_listener("server").await;
    listener.shutdown().await.unwrap();
    assert!(timeout(WAIT, listener.accept()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_out_of_range_timestamp_does_not_stop_listener() {
    let listener = start_listener("server").await;
    let addr = listener.local_addr().unwrap();

    let intruder = CredentialEngine::new("intruder");
    let credential = intruder.create_self_signed_credential().unwrap();
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for millis in [i64::MIN, i64::MAX] {
        let payload = encode_frames(&[Frame::VcInit {
            credential: Box::new(credential.clone()),
            challenge: Challenge::generate(),
            timestamp: Timestamp::from_millis(millis),
        }])
        .unwrap();
        let header = PacketHeader::for_connection(
            PacketType::Initial,
            &ConnectionId::generate(),
            &ConnectionId::generate(),
            0,
        );
        raw.send_to(&encode_packet(&header, &payload).unwrap(), addr)
            .await
            .unwrap();
    }

    // The receive loop is still running after both INITIALs.
    let manager = client("client", test_config());
    let stream = manager.connect(addr).await.unwrap();
    assert_eq!(stream.remote_device_id(), Some("server"));
    assert!(!listener.engine().is_peer_verified("intruder"));
    assert_eq!(listener.connection_ids().len(), 1);
}

#[tokio::test]
async fn test_invitation_credential_over_handshake() {
    let server_engine = Arc::new(CredentialEngine::new("server"));
    server_engine.add_invitation(invitation("aa"));
    let listener = QuicVcListener::bind(test_config(), server_engine).await.unwrap();
    let mut server_events = listener.subscribe();

    let client_engine = Arc::new(CredentialEngine::new("client"));
    let credential = client_engine
        .create_credential_from_invitation(&invitation("aa"))
        .unwrap();
    assert_eq!(credential.credential_subject.invitation_token.as_deref(), Some(TOKEN));
    let manager = ConnectionManager::new(test_config(), client_engine);

    let _stream = manager.connect(listener.local_addr().unwrap()).await.unwrap();

    let peer = timeout(WAIT, async {
        loop {
            if let Ok(NodeEvent::PeerAuthenticated(peer)) = server_events.recv().await {
                return peer;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(peer.device_id, "client");
    assert_eq!(peer.trust_level, TrustLevel::Invitation);
    assert_eq!(
        listener.engine().get_verified_peer("client").unwrap().trust_level,
        TrustLevel::Invitation
    );
}

#[tokio::test]
async fn test_invitation_mismatch_rejected_by_client() {
    // The server holds a credential naming a different inviter key.
    let server_engine = Arc::new(CredentialEngine::new("server"));
    server_engine
        .create_credential_from_invitation(&invitation("bb"))
        .unwrap();
    let listener = QuicVcListener::bind(test_config(), server_engine).await.unwrap();

    let client_engine = Arc::new(CredentialEngine::new("client"));
    client_engine.add_invitation(invitation("aa"));
    let manager = ConnectionManager::new(test_config(), client_engine);

    let err = manager
        .connect(listener.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::CredentialVerification(CredentialError::InvitationMismatch { ref token }) if token == TOKEN
    ));
    assert!(!manager.engine().is_peer_verified("server"));
    assert!(manager.connection_ids().is_empty());
}

#[tokio::test]
async fn test_invitation_mismatch_rejected_by_listener() {
    let server_engine = Arc::new(CredentialEngine::new("server"));
    server_engine.add_invitation(invitation("aa"));
    let listener = QuicVcListener::bind(test_config(), server_engine).await.unwrap();
    let mut server_events = listener.subscribe();

    let client_engine = Arc::new(CredentialEngine::new("client"));
    client_engine
        .create_credential_from_invitation(&invitation("bb"))
        .unwrap();
    let mut config = test_config();
    config.handshake.timeout_ms = 300;
    let manager = ConnectionManager::new(config, client_engine);

    let err = manager
        .connect(listener.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::HandshakeTimeout { .. }));
    assert!(!listener.engine().is_peer_verified("client"));

    let event = timeout(WAIT, server_events.recv()).await.unwrap().unwrap();
    match event {
        NodeEvent::Error { connection: None, message } => assert!(message.contains(TOKEN)),
        other => panic!("unexpected event {other:?}"),
    }
}
