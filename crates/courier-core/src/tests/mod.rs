pub mod end_to_end_tests;

use crate::config::{CoreConfig, DrainPolicy};
use crate::crypto::{CipherMessage, CryptoProvider, InitiatorHeader, KeyBundle, PeerCipher};
use crate::error::{CoreError, CryptoError};
use crate::frame::Frame;
use crate::ids::PeerId;
use crate::presence::PeerSummary;
use crate::relay::{InMemoryRelay, Relay};
use crate::Core;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

pub fn peer(name: &str) -> PeerId {
    PeerId::new(name)
}

pub fn config(name: &str, policy: DrainPolicy) -> CoreConfig {
    CoreConfig {
        drain_policy: policy,
        ..CoreConfig::for_peer(peer(name), name)
    }
}

#[derive(Clone)]
pub struct RecordingRelay {
    inner: InMemoryRelay,
    sent: Arc<Mutex<Vec<Frame>>>,
    fail_sends: Arc<AtomicUsize>,
}

impl RecordingRelay {
    pub fn new(inner: InMemoryRelay) -> Self {
        Self {
            inner,
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_sends: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn sent(&self) -> Vec<Frame> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|f| f.kind() == kind)
            .count()
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn send(&self, frame: Frame) -> Result<(), CoreError> {
        let remaining = self.fail_sends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_sends.store(remaining - 1, Ordering::SeqCst);
            return Err(CoreError::Transport("send".to_string()));
        }
        self.sent.lock().await.push(frame.clone());
        self.inner.send(frame).await
    }

    async fn pull(&self, local: &PeerId) -> Result<Vec<Frame>, CoreError> {
        self.inner.pull(local).await
    }

    async fn close(&self, local: &PeerId) -> Result<(), CoreError> {
        self.inner.close(local).await
    }
}

// Crypto double whose failures and latency are switched from the test body.
#[derive(Clone, Default)]
pub struct StubCrypto {
    pub reject_bundles: Arc<AtomicBool>,
    pub fail_encrypt: Arc<AtomicBool>,
    pub fail_decrypt: Arc<AtomicBool>,
    pub encrypt_delay_ms: Arc<AtomicU64>,
}

impl CryptoProvider for StubCrypto {
    fn create_session(&self, _peer: &PeerId) -> Box<dyn PeerCipher> {
        Box::new(StubCipher {
            switches: self.clone(),
            established: false,
            counter: 0,
        })
    }

    fn generate_prekey_bundle(
        &self,
        pre_key_id: u32,
        signed_key_id: u32,
    ) -> Result<KeyBundle, CryptoError> {
        Ok(KeyBundle {
            version: 1,
            identity_dh: [1u8; 32],
            identity_signing: [2u8; 32],
            signed_prekey_id: signed_key_id,
            signed_prekey: [3u8; 32],
            signed_prekey_signature: vec![0u8; 64],
            pre_key_id,
            one_time_prekey: Some([4u8; 32]),
        })
    }
}

struct StubCipher {
    switches: StubCrypto,
    established: bool,
    counter: u64,
}

#[async_trait]
impl PeerCipher for StubCipher {
    async fn process_key_bundle(&mut self, _bundle: &KeyBundle) -> Result<(), CryptoError> {
        if self.switches.reject_bundles.load(Ordering::SeqCst) {
            return Err(CryptoError::SignatureMismatch);
        }
        self.established = true;
        Ok(())
    }

    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<CipherMessage, CryptoError> {
        let delay = self.switches.encrypt_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        if !self.established {
            return Err(CryptoError::NoSession);
        }
        if self.switches.fail_encrypt.load(Ordering::SeqCst) {
            return Err(CryptoError::Encrypt);
        }
        self.counter += 1;
        Ok(CipherMessage {
            header: InitiatorHeader {
                identity_dh: [0u8; 32],
                identity_signing: [0u8; 32],
                ephemeral: [0u8; 32],
                signed_prekey_id: 1,
                pre_key_id: None,
            },
            counter: self.counter,
            nonce: [0u8; 24],
            body: plaintext.to_vec(),
        })
    }

    async fn decrypt(&mut self, message: &CipherMessage) -> Result<Vec<u8>, CryptoError> {
        if self.switches.fail_decrypt.load(Ordering::SeqCst) {
            return Err(CryptoError::Decrypt);
        }
        Ok(message.body.clone())
    }
}

pub struct Pair {
    pub hub: InMemoryRelay,
    pub relay_a: RecordingRelay,
    pub relay_b: RecordingRelay,
    pub a: Core,
    pub b: Core,
}

pub async fn stub_pair(policy: DrainPolicy, crypto: StubCrypto) -> Pair {
    let crypto: Arc<dyn CryptoProvider> = Arc::new(crypto);
    pair_with(policy, crypto.clone(), crypto).await
}

pub async fn pair_with(
    policy: DrainPolicy,
    crypto_a: Arc<dyn CryptoProvider>,
    crypto_b: Arc<dyn CryptoProvider>,
) -> Pair {
    let hub = InMemoryRelay::new();
    hub.connect(PeerSummary::new(peer("alice"), "alice", true))
        .await;
    hub.connect(PeerSummary::new(peer("bob"), "bob", true)).await;
    let relay_a = RecordingRelay::new(hub.clone());
    let relay_b = RecordingRelay::new(hub.clone());
    let a = Core::init(config("alice", policy), crypto_a, Arc::new(relay_a.clone()))
        .await
        .expect("core a");
    let b = Core::init(config("bob", policy), crypto_b, Arc::new(relay_b.clone()))
        .await
        .expect("core b");
    Pair {
        hub,
        relay_a,
        relay_b,
        a,
        b,
    }
}

// Polls every core until a full round moves no frames.
pub async fn settle(cores: &[&Core]) {
    for _ in 0..16 {
        let mut moved = 0;
        for core in cores {
            moved += core.poll_once().await.expect("poll");
        }
        if moved == 0 {
            return;
        }
    }
}
