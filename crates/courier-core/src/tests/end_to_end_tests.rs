use super::{config, pair_with, peer, settle, Pair};
use crate::config::DrainPolicy;
use crate::conversation::Direction;
use crate::crypto::{CipherMessage, CryptoProvider, X3dhProvider};
use crate::error::{CoreError, CryptoError};
use crate::event::CoreEvent;
use crate::frame::{Frame, SenderMeta};
use crate::identity::LocalKeyCounters;
use crate::presence::PeerSummary;
use crate::relay::{InMemoryRelay, Relay};
use crate::session::HandshakeState;
use crate::Core;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

async fn x3dh_pair() -> Pair {
    pair_with(
        DrainPolicy::DrainAll,
        Arc::new(X3dhProvider::new()),
        Arc::new(X3dhProvider::new()),
    )
    .await
}

fn payloads(entries: &[crate::conversation::ConversationEntry]) -> Vec<(Direction, String)> {
    entries
        .iter()
        .map(|e| (e.direction, e.payload.clone()))
        .collect()
}

#[tokio::test]
async fn conversation_round_trip_over_x3dh() {
    let pair = x3dh_pair().await;
    let mut rx = pair.b.subscribe();
    pair.a
        .send_text(&peer("bob"), "hello bob")
        .await
        .expect("send");
    settle(&[&pair.a, &pair.b]).await;

    let received = pair.b.history(&peer("alice")).await;
    assert_eq!(
        payloads(&received),
        vec![(Direction::Received, "hello bob".to_string())]
    );
    let mut saw_message = false;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::MessageReceived { peer: from, text, .. } = event {
            assert_eq!(from, peer("alice"));
            assert_eq!(text, "hello bob");
            saw_message = true;
        }
    }
    assert!(saw_message);

    pair.b
        .send_text(&peer("alice"), "hi alice")
        .await
        .expect("reply");
    settle(&[&pair.a, &pair.b]).await;
    assert_eq!(
        payloads(&pair.a.history(&peer("bob")).await),
        vec![
            (Direction::Sent, "hello bob".to_string()),
            (Direction::Received, "hi alice".to_string()),
        ]
    );
    assert_eq!(pair.a.conversation_peers().await, vec![peer("bob")]);
    assert_eq!(
        pair.b.handshake_state(&peer("alice")).await,
        Some(HandshakeState::Ready)
    );
    assert_eq!(
        pair.a.key_counters().await,
        LocalKeyCounters {
            pre_key_id: 2,
            signed_key_id: 2
        }
    );

    for text in ["one", "two", "three"] {
        pair.a.send_text(&peer("bob"), text).await.expect("send");
    }
    settle(&[&pair.a, &pair.b]).await;
    assert_eq!(pair.b.history(&peer("alice")).await.len(), 4);
}

#[tokio::test]
async fn tampered_and_replayed_ciphertext_are_dropped() {
    let pair = x3dh_pair().await;
    pair.a.send_text(&peer("bob"), "first").await.expect("send");
    settle(&[&pair.a, &pair.b]).await;

    let genuine = pair
        .relay_a
        .sent()
        .await
        .into_iter()
        .find(|f| f.kind() == "ciphertext")
        .expect("ciphertext frame");
    let Frame::Ciphertext {
        receiver,
        sender,
        ciphertext,
        sender_meta,
    } = genuine.clone()
    else {
        panic!("expected ciphertext");
    };
    let mut message = CipherMessage::decode(&ciphertext).expect("decode");
    message.body[0] ^= 0x80;
    let tampered = Frame::Ciphertext {
        receiver,
        sender,
        ciphertext: message.encode().expect("encode"),
        sender_meta,
    };

    let mut rx = pair.b.subscribe();
    assert_eq!(
        pair.b.handle_frame(tampered).await.expect_err("tampered"),
        CoreError::Crypto(CryptoError::Decrypt)
    );
    assert_eq!(
        pair.b.handle_frame(genuine).await.expect_err("replay"),
        CoreError::Crypto(CryptoError::Decrypt)
    );
    let failures = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, CoreEvent::DecryptFailed { .. }))
        .count();
    assert_eq!(failures, 2);
    assert_eq!(pair.b.history(&peer("alice")).await.len(), 1);

    pair.a.send_text(&peer("bob"), "second").await.expect("send");
    settle(&[&pair.a, &pair.b]).await;
    let received: Vec<String> = pair
        .b
        .history(&peer("alice"))
        .await
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(received, vec!["first", "second"]);
}

#[tokio::test]
async fn presence_follows_relay_roster_and_updates() {
    let pair = x3dh_pair().await;
    settle(&[&pair.a, &pair.b]).await;
    assert!(pair.a.presence().await.is_online(&peer("bob")));
    assert!(pair.b.presence().await.is_online(&peer("alice")));
    assert!(pair.a.presence().await.get(&peer("alice")).is_none());

    pair.hub
        .connect(PeerSummary::new(peer("carol"), "carol", true))
        .await;
    pair.hub.disconnect(&peer("bob")).await;
    settle(&[&pair.a, &pair.b]).await;
    let directory = pair.a.presence().await;
    let online: Vec<String> = directory
        .online()
        .into_iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(online, vec!["carol"]);
    assert!(!directory.is_online(&peer("bob")));
    assert_eq!(directory.len(), 2);
}

#[tokio::test]
async fn teardown_clears_sessions_and_announces_departure() {
    let pair = x3dh_pair().await;
    pair.a.send_text(&peer("bob"), "bye").await.expect("send");
    settle(&[&pair.a, &pair.b]).await;
    assert_eq!(pair.a.session_count().await, 1);

    pair.a.teardown().await.expect("teardown");
    assert_eq!(pair.a.session_count().await, 0);
    assert_eq!(pair.a.handshake_state(&peer("bob")).await, None);
    assert_eq!(
        pair.a.send_text(&peer("bob"), "late").await.expect_err("closed"),
        CoreError::Closed
    );
    assert_eq!(pair.a.poll_once().await.expect_err("closed"), CoreError::Closed);
    pair.a.teardown().await.expect("second teardown");
    settle(&[&pair.b]).await;
    assert!(!pair.b.presence().await.is_online(&peer("alice")));
}

#[tokio::test]
async fn reset_session_starts_a_fresh_handshake() {
    let pair = x3dh_pair().await;
    pair.a.send_text(&peer("bob"), "before").await.expect("send");
    settle(&[&pair.a, &pair.b]).await;
    assert!(pair.a.reset_session(&peer("bob")).await);
    assert!(!pair.a.reset_session(&peer("bob")).await);

    pair.a.send_text(&peer("bob"), "after").await.expect("send");
    assert_eq!(
        pair.a.handshake_state(&peer("bob")).await,
        Some(HandshakeState::KeyRequested)
    );
    settle(&[&pair.a, &pair.b]).await;
    let received: Vec<String> = pair
        .b
        .history(&peer("alice"))
        .await
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(received, vec!["before", "after"]);
    assert_eq!(pair.relay_a.count("key-request").await, 2);
}

#[tokio::test]
async fn background_poller_delivers_without_manual_polls() {
    let hub = InMemoryRelay::new();
    hub.connect(PeerSummary::new(peer("alice"), "alice", true))
        .await;
    hub.connect(PeerSummary::new(peer("bob"), "bob", true)).await;
    let mut cfg_a = config("alice", DrainPolicy::DrainAll);
    cfg_a.polling_interval_ms = 5;
    let mut cfg_b = config("bob", DrainPolicy::DrainAll);
    cfg_b.polling_interval_ms = 5;
    let a = Core::init(cfg_a, Arc::new(X3dhProvider::new()), Arc::new(hub.clone()))
        .await
        .expect("core a");
    let b = Core::init(cfg_b, Arc::new(X3dhProvider::new()), Arc::new(hub.clone()))
        .await
        .expect("core b");

    a.send_text(&peer("bob"), "polled").await.expect("send");
    let mut delivered = false;
    for _ in 0..200 {
        if !b.history(&peer("alice")).await.is_empty() {
            delivered = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered);
    a.teardown().await.expect("teardown a");
    b.teardown().await.expect("teardown b");
}

async fn bundle_for(pair: &Pair, requester: &str) -> crate::crypto::KeyBundle {
    pair.b
        .handle_frame(Frame::KeyRequest {
            requesting_peer: peer(requester),
            target_peer: peer("bob"),
        })
        .await
        .expect("key request");
    let frames = pair.hub.pull(&peer(requester)).await.expect("pull");
    let key = frames
        .into_iter()
        .find_map(|frame| match frame {
            Frame::KeyResponse { key, .. } => Some(key),
            _ => None,
        })
        .expect("key response");
    crate::crypto::KeyBundle::decode(&key).expect("bundle")
}

#[tokio::test]
async fn forged_sender_is_rejected_and_real_chain_survives() {
    let pair = x3dh_pair().await;
    pair.a
        .send_text(&peer("bob"), "hi from alice")
        .await
        .expect("send");
    settle(&[&pair.a, &pair.b]).await;

    let mallory = X3dhProvider::new();
    let bundle = bundle_for(&pair, "mallory").await;
    let mut forger = mallory.create_session(&peer("bob"));
    forger.process_key_bundle(&bundle).await.expect("process");
    let forged = forger.encrypt(b"forged as alice").await.expect("encrypt");
    let frame = Frame::Ciphertext {
        receiver: peer("bob"),
        sender: peer("alice"),
        ciphertext: forged.encode().expect("encode"),
        sender_meta: SenderMeta {
            message_id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            created_at_ms: 0,
        },
    };
    assert_eq!(
        pair.b.handle_frame(frame).await.expect_err("forged"),
        CoreError::Crypto(CryptoError::IdentityMismatch)
    );

    pair.a
        .send_text(&peer("bob"), "second from alice")
        .await
        .expect("send");
    settle(&[&pair.a, &pair.b]).await;
    let received: Vec<String> = pair
        .b
        .history(&peer("alice"))
        .await
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(received, vec!["hi from alice", "second from alice"]);
}

#[tokio::test]
async fn repeated_key_requests_keep_prekey_store_bounded() {
    let bob_keys = X3dhProvider::with_prekey_limit(3);
    let pair = pair_with(
        DrainPolicy::DrainAll,
        Arc::new(X3dhProvider::new()),
        Arc::new(bob_keys.clone()),
    )
    .await;
    for _ in 0..10 {
        bundle_for(&pair, "mallory").await;
    }
    assert_eq!(pair.b.key_counters().await.pre_key_id, 11);
    assert_eq!(bob_keys.one_time_prekeys_available(), 3);
    assert_eq!(bob_keys.signed_prekeys_available(), 3);

    pair.a.send_text(&peer("bob"), "still works").await.expect("send");
    settle(&[&pair.a, &pair.b]).await;
    assert_eq!(pair.b.history(&peer("alice")).await.len(), 1);
    assert!(bob_keys.one_time_prekeys_available() <= 3);
}

#[tokio::test]
async fn closed_core_ignores_inbound_frames() {
    let pair = x3dh_pair().await;
    pair.b.teardown().await.expect("teardown");
    assert_eq!(
        pair.b
            .handle_frame(Frame::KeyAck {
                from: peer("carol"),
                to: peer("bob"),
            })
            .await
            .expect_err("closed"),
        CoreError::Closed
    );
    assert_eq!(
        pair.b
            .handle_frame(Frame::KeyRequest {
                requesting_peer: peer("mallory"),
                target_peer: peer("bob"),
            })
            .await
            .expect_err("closed"),
        CoreError::Closed
    );
    assert_eq!(pair.b.session_count().await, 0);
    assert_eq!(pair.b.key_counters().await.pre_key_id, 1);
    assert_eq!(pair.hub.pending_len(&peer("mallory")).await, 0);
}
