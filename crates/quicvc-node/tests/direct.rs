// ============================================
// File: crates/quicvc-node/tests/direct.rs
// ============================================
//! Loopback tests for direct-auth sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use quicvc_core::credential::{CredentialEngine, Invitation, TrustLevel, VcMessage};
use quicvc_core::protocol::service::DataMessage;
use quicvc_core::protocol::{encode_service, ServiceType};
use quicvc_node::{DirectSessionManager, NodeConfig, NodeError, NodeEvent, SessionState};

const WAIT: Duration = Duration::from_secs(3);

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.handshake.timeout_ms = 2000;
    config
}

async fn start(device_id: &str) -> DirectSessionManager {
    DirectSessionManager::bind(test_config(), Arc::new(CredentialEngine::new(device_id)))
        .await
        .unwrap()
}

async fn wait_ready(manager: &DirectSessionManager, peer: SocketAddr) {
    timeout(WAIT, async {
        while manager.session_state(peer) != Some(SessionState::Ready) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_matching<F, T>(events: &mut broadcast::Receiver<NodeEvent>, mut pick: F) -> T
where
    F: FnMut(NodeEvent) -> Option<T>,
{
    timeout(WAIT, async {
        loop {
            if let Ok(event) = events.recv().await {
                if let Some(found) = pick(event) {
                    return found;
                }
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_mutual_authentication_and_data() {
    let alice = start("alice").await;
    let bob = start("bob").await;
    let alice_addr = alice.local_addr().unwrap();
    let bob_addr = bob.local_addr().unwrap();
    let mut bob_events = bob.subscribe();

    let device_id = alice.authenticate(bob_addr).await.unwrap();
    assert_eq!(device_id, "bob");
    assert_eq!(alice.session_state(bob_addr), Some(SessionState::Ready));
    assert!(alice.engine().is_peer_verified("bob"));

    // Bob runs the reverse exchange after alice's vc_ack.
    wait_ready(&bob, alice_addr).await;
    assert!(bob.engine().is_peer_verified("alice"));
    assert_eq!(bob.remote_device_id(alice_addr).as_deref(), Some("alice"));

    alice.send(bob_addr, b"hi bob").await.unwrap();
    let (from, payload) = next_matching(&mut bob_events, |event| match event {
        NodeEvent::DirectData {
            device_id, payload, ..
        } => Some((device_id, payload)),
        _ => None,
    })
    .await;
    assert_eq!(from, "alice");
    assert_eq!(&payload[..], b"hi bob");
}

#[tokio::test]
async fn test_send_requires_ready_session() {
    let alice = start("alice").await;
    let nowhere: SocketAddr = "127.0.0.1:9".parse().unwrap();

    let err = alice.send(nowhere, b"x").await.unwrap_err();
    assert!(matches!(err, NodeError::SessionNotReady { ref state, .. } if state == "none"));
}

#[tokio::test]
async fn test_rejected_credential_reports_error() {
    let alice = start("alice").await;

    let bob_engine = Arc::new(CredentialEngine::new("bob"));
    let mut forged = bob_engine.create_self_signed_credential().unwrap();
    forged.credential_subject.device_id = "root".into();
    bob_engine.set_local_credential(forged);
    let bob = DirectSessionManager::bind(test_config(), bob_engine).await.unwrap();
    let mut bob_events = bob.subscribe();
    let alice_addr = alice.local_addr().unwrap();

    let err = alice
        .authenticate(bob.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::AuthenticationFailed { .. }));
    assert!(!alice.engine().is_peer_verified("root"));

    // Bob hears about it through vc_error.
    let remote = next_matching(&mut bob_events, |event| match event {
        NodeEvent::AuthenticationError { remote, .. } => Some(remote),
        _ => None,
    })
    .await;
    assert_eq!(remote, alice_addr);
    assert_eq!(bob.session_state(alice_addr), Some(SessionState::Closed));
}

#[tokio::test]
async fn test_authenticate_times_out_without_peer() {
    let mut config = test_config();
    config.handshake.timeout_ms = 200;
    let alice = DirectSessionManager::bind(config, Arc::new(CredentialEngine::new("alice")))
        .await
        .unwrap();
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let err = alice
        .authenticate(silent.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::HandshakeTimeout { timeout_ms: 200 }));
    assert_eq!(alice.session_state(silent.local_addr().unwrap()), None);
}

#[tokio::test]
async fn test_discovery_announcement() {
    let alice = start("alice").await;
    let bob = start("bob").await;
    let mut bob_events = bob.subscribe();

    alice.announce(bob.local_addr().unwrap()).await.unwrap();

    let (device_id, key) = next_matching(&mut bob_events, |event| match event {
        NodeEvent::Discovery {
            device_id,
            public_key_hex,
            ..
        } => Some((device_id, public_key_hex)),
        _ => None,
    })
    .await;
    assert_eq!(device_id, "alice");
    assert_eq!(key, alice.engine().public_key_hex());
}

#[tokio::test]
async fn test_unknown_service_type_is_ignored() {
    let alice = start("alice").await;
    let bob = start("bob").await;
    let bob_addr = bob.local_addr().unwrap();

    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(&[0x63, b'{', b'}'], bob_addr).await.unwrap();
    raw.send_to(&[], bob_addr).await.unwrap();

    // Bob keeps working.
    assert_eq!(alice.authenticate(bob_addr).await.unwrap(), "bob");
}

#[tokio::test]
async fn test_close_session() {
    let alice = start("alice").await;
    let bob = start("bob").await;
    let bob_addr = bob.local_addr().unwrap();

    alice.authenticate(bob_addr).await.unwrap();
    alice.close(bob_addr);
    alice.close(bob_addr);

    assert_eq!(alice.session_state(bob_addr), None);
    assert!(matches!(
        alice.send(bob_addr, b"x").await,
        Err(NodeError::SessionNotReady { .. })
    ));
    alice.heartbeat(bob_addr).await.unwrap();
}

#[tokio::test]
async fn test_unsolicited_exchange_messages_do_not_authenticate() {
    let alice = start("alice").await;
    let bob = start("bob").await;
    let alice_addr = alice.local_addr().unwrap();
    let bob_addr = bob.local_addr().unwrap();
    let mut bob_events = bob.subscribe();

    alice.authenticate(bob_addr).await.unwrap();
    wait_ready(&bob, alice_addr).await;

    // A third socket claims to be alice without ever being asked.
    let mallory = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mallory_addr = mallory.local_addr().unwrap();
    let ack = VcMessage::Ack {
        device_id: "alice".into(),
    };
    let replayed = VcMessage::Response {
        credential: Box::new(alice.engine().local_credential().unwrap()),
        challenge: None,
    };
    let data = DataMessage {
        device_id: "alice".into(),
        data: BASE64.encode(b"evil"),
    };
    for datagram in [
        encode_service(ServiceType::VcExchange, &ack).unwrap(),
        encode_service(ServiceType::VcExchange, &replayed).unwrap(),
        encode_service(ServiceType::Data, &data).unwrap(),
    ] {
        mallory.send_to(&datagram, bob_addr).await.unwrap();
    }

    // Alice's data arrives after mallory's datagrams; nothing from mallory precedes it.
    alice.send(bob_addr, b"hello").await.unwrap();
    let (remote, payload) = next_matching(&mut bob_events, |event| match event {
        NodeEvent::DirectData { remote, payload, .. } => Some((remote, payload)),
        _ => None,
    })
    .await;
    assert_eq!(remote, alice_addr);
    assert_eq!(&payload[..], b"hello");

    assert_eq!(bob.session_state(mallory_addr), None);
    assert_eq!(bob.remote_device_id(mallory_addr), None);
}

#[tokio::test]
async fn test_ack_without_verification_starts_reverse_exchange() {
    let bob = start("bob").await;
    let bob_addr = bob.local_addr().unwrap();
    let mallory = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mallory_addr = mallory.local_addr().unwrap();

    let request = VcMessage::Request {
        device_id: "alice".into(),
        challenge: None,
    };
    let ack = VcMessage::Ack {
        device_id: "alice".into(),
    };
    mallory
        .send_to(&encode_service(ServiceType::VcExchange, &request).unwrap(), bob_addr)
        .await
        .unwrap();
    mallory
        .send_to(&encode_service(ServiceType::VcExchange, &ack).unwrap(), bob_addr)
        .await
        .unwrap();

    // Bob answers the request, then asks mallory for a credential of its own.
    let mut buf = [0u8; 4096];
    let mut kinds = Vec::new();
    for _ in 0..2 {
        let (len, _) = timeout(WAIT, mallory.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(buf[0], ServiceType::VcExchange.as_byte());
        let message: VcMessage = serde_json::from_slice(&buf[1..len]).unwrap();
        kinds.push(message.kind());
    }
    assert_eq!(kinds, ["vc_response", "vc_request"]);

    assert_eq!(bob.session_state(mallory_addr), Some(SessionState::Authenticating));
    assert!(matches!(
        bob.send(mallory_addr, b"x").await,
        Err(NodeError::SessionNotReady { ref state, .. }) if state == "authenticating"
    ));
}

#[tokio::test]
async fn test_invitation_credential_over_exchange() {
    let invitation = Invitation::new("abc123", "aa".repeat(32), "wss://broker");

    let alice_engine = Arc::new(CredentialEngine::new("alice"));
    alice_engine.add_invitation(invitation.clone());
    let alice = DirectSessionManager::bind(test_config(), alice_engine).await.unwrap();

    let bob_engine = Arc::new(CredentialEngine::new("bob"));
    bob_engine.create_credential_from_invitation(&invitation).unwrap();
    let bob = DirectSessionManager::bind(test_config(), bob_engine).await.unwrap();

    assert_eq!(alice.authenticate(bob.local_addr().unwrap()).await.unwrap(), "bob");
    let peer = alice.engine().get_verified_peer("bob").unwrap();
    assert_eq!(peer.trust_level, TrustLevel::Invitation);

    // A credential naming another inviter key for the same token is refused.
    let carol_engine = Arc::new(CredentialEngine::new("carol"));
    carol_engine
        .create_credential_from_invitation(&Invitation::new("abc123", "bb".repeat(32), "wss://broker"))
        .unwrap();
    let carol = DirectSessionManager::bind(test_config(), carol_engine).await.unwrap();

    let err = alice
        .authenticate(carol.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::AuthenticationFailed { ref reason } if reason.contains("abc123")));
    assert!(!alice.engine().is_peer_verified("carol"));
}
