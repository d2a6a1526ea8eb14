use crate::crypto::{CryptoProvider, PeerCipher};
use crate::error::CoreError;
use crate::ids::PeerId;
use crate::time::now_ms;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    Uninitialized,
    KeyRequested,
    Ready,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: Uuid,
    pub text: String,
    pub receiver: PeerId,
    pub created_at_ms: u64,
}

impl PendingMessage {
    pub fn new(receiver: PeerId, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            receiver,
            created_at_ms: now_ms(),
        }
    }
}

pub struct Session {
    peer: PeerId,
    queue: VecDeque<PendingMessage>,
    handshake: HandshakeState,
    cipher: Box<dyn PeerCipher>,
}

impl Session {
    fn new(peer: PeerId, cipher: Box<dyn PeerCipher>) -> Self {
        Self {
            peer,
            queue: VecDeque::new(),
            handshake: HandshakeState::Uninitialized,
            cipher,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingMessage> {
        self.queue.iter()
    }

    // Returns true only for the transition out of Uninitialized.
    pub(crate) fn mark_key_requested(&mut self) -> bool {
        if self.handshake == HandshakeState::Uninitialized {
            self.handshake = HandshakeState::KeyRequested;
            return true;
        }
        false
    }

    pub(crate) fn mark_uninitialized(&mut self) {
        self.handshake = HandshakeState::Uninitialized;
    }

    pub(crate) fn mark_ready(&mut self) {
        self.handshake = HandshakeState::Ready;
    }

    pub(crate) fn enqueue(
        &mut self,
        message: PendingMessage,
        max_queue_len: Option<usize>,
    ) -> Result<(), CoreError> {
        if let Some(max) = max_queue_len {
            if self.queue.len() >= max {
                return Err(CoreError::QueueFull(self.peer.clone()));
            }
        }
        self.queue.push_back(message);
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Option<PendingMessage> {
        self.queue.pop_front()
    }

    pub(crate) fn cipher_mut(&mut self) -> &mut dyn PeerCipher {
        self.cipher.as_mut()
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Clone)]
pub struct SessionTable {
    crypto: Arc<dyn CryptoProvider>,
    sessions: Arc<Mutex<HashMap<PeerId, SessionHandle>>>,
    max_queue_len: Option<usize>,
}

impl SessionTable {
    pub fn new(crypto: Arc<dyn CryptoProvider>, max_queue_len: Option<usize>) -> Self {
        Self {
            crypto,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_queue_len,
        }
    }

    pub async fn get_or_create(&self, peer: &PeerId) -> SessionHandle {
        let mut guard = self.sessions.lock().await;
        guard
            .entry(peer.clone())
            .or_insert_with(|| {
                debug!("session created peer={}", peer.short());
                Arc::new(Mutex::new(Session::new(
                    peer.clone(),
                    self.crypto.create_session(peer),
                )))
            })
            .clone()
    }

    pub async fn get(&self, peer: &PeerId) -> Option<SessionHandle> {
        self.sessions.lock().await.get(peer).cloned()
    }

    pub async fn enqueue_outbound(
        &self,
        peer: &PeerId,
        message: PendingMessage,
    ) -> Result<(), CoreError> {
        let handle = self
            .get(peer)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
        let mut session = handle.lock().await;
        session.enqueue(message, self.max_queue_len)
    }

    pub fn max_queue_len(&self) -> Option<usize> {
        self.max_queue_len
    }

    pub async fn handshake_state(&self, peer: &PeerId) -> Option<HandshakeState> {
        let handle = self.get(peer).await?;
        let session = handle.lock().await;
        Some(session.handshake())
    }

    pub async fn queue_len(&self, peer: &PeerId) -> Option<usize> {
        let handle = self.get(peer).await?;
        let session = handle.lock().await;
        Some(session.queue_len())
    }

    pub async fn pending_texts(&self, peer: &PeerId) -> Vec<String> {
        let Some(handle) = self.get(peer).await else {
            return Vec::new();
        };
        let session = handle.lock().await;
        session.pending().map(|m| m.text.clone()).collect()
    }

    pub async fn remove(&self, peer: &PeerId) -> bool {
        self.sessions.lock().await.remove(peer).is_some()
    }

    pub async fn clear(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
