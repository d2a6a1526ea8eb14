pub mod config;
pub mod conversation;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod identity;
pub mod ids;
pub mod presence;
pub mod relay;
pub mod session;
pub mod time;

use config::{CoreConfig, DrainPolicy};
use conversation::{ConversationEntry, ConversationLog};
use crypto::{CipherMessage, CryptoProvider};
use delivery::{drain_all, drain_one, DeliveryContext, DrainOutcome};
use error::CoreError;
use event::{CoreEvent, EventBus, EventReceiver};
use frame::{Frame, SenderMeta};
use handshake::{apply_key_response, key_response_frame, request_key, retry_request, ApplyOutcome};
use identity::{LocalKeyCounters, PrekeyTracker};
use ids::PeerId;
use log::{debug, info, warn};
use presence::{PeerSummary, PresenceDirectory, PresenceStatus};
use relay::Relay;
use session::{HandshakeState, PendingMessage, Session, SessionTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Clone)]
pub struct Core {
    config: CoreConfig,
    relay: Arc<dyn Relay>,
    sessions: SessionTable,
    presence: Arc<Mutex<PresenceDirectory>>,
    conversations: Arc<Mutex<ConversationLog>>,
    prekeys: PrekeyTracker,
    events: EventBus,
    poller: Arc<Mutex<Option<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
}

impl Core {
    pub async fn init(
        config: CoreConfig,
        crypto: Arc<dyn CryptoProvider>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self, CoreError> {
        let core = Self {
            sessions: SessionTable::new(crypto.clone(), config.max_queue_len),
            prekeys: PrekeyTracker::new(crypto),
            events: EventBus::new(config.event_buffer),
            presence: Arc::new(Mutex::new(PresenceDirectory::new())),
            conversations: Arc::new(Mutex::new(ConversationLog::new())),
            poller: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            relay,
            config,
        };
        if core.config.polling_interval_ms > 0 {
            core.start_relay_poller().await;
        }
        info!(
            "core initialized local={} policy={:?}",
            core.config.local_id.short(),
            core.config.drain_policy
        );
        Ok(core)
    }

    pub async fn teardown(&self) -> Result<(), CoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        self.sessions.clear().await;
        self.relay.close(&self.config.local_id).await?;
        info!("core torn down local={}", self.config.local_id.short());
        Ok(())
    }

    pub fn local_id(&self) -> &PeerId {
        &self.config.local_id
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn send_text(&self, peer: &PeerId, text: &str) -> Result<Uuid, CoreError> {
        self.ensure_open()?;
        let message = PendingMessage::new(peer.clone(), text);
        let id = message.id;
        let handle = self.sessions.get_or_create(peer).await;
        let mut session = handle.lock().await;
        session.enqueue(message, self.sessions.max_queue_len())?;
        match session.handshake() {
            // The message stays queued; the error carries its id so the caller
            // retries the request instead of sending the text again.
            HandshakeState::Uninitialized => {
                if let Err(err) =
                    request_key(&mut session, &self.config.local_id, self.relay.as_ref()).await
                {
                    warn!("key request not sent peer={} err={}", peer.short(), err);
                    return Err(CoreError::KeyRequestUnsent {
                        peer: peer.clone(),
                        message_id: id,
                        reason: err.to_string(),
                    });
                }
            }
            HandshakeState::KeyRequested => {
                debug!(
                    "handshake outstanding, queued peer={} depth={}",
                    peer.short(),
                    session.queue_len()
                );
            }
            // A ready session has nothing to wait for, so everything queued goes now.
            HandshakeState::Ready => {
                drain_all(&mut session, &self.delivery_context()).await?;
            }
        }
        Ok(id)
    }

    pub async fn handle_frame(&self, frame: Frame) -> Result<(), CoreError> {
        self.ensure_open()?;
        match frame {
            Frame::KeyRequest {
                requesting_peer,
                target_peer,
            } => {
                if target_peer != self.config.local_id {
                    warn!("key request for another peer ignored target={}", target_peer.short());
                    return Ok(());
                }
                self.handle_key_request(&requesting_peer).await
            }
            Frame::KeyResponse {
                generator_id,
                key,
                pre_key_id,
                signed_key_id,
                ..
            } => {
                self.handle_key_response(&generator_id, &key, pre_key_id, signed_key_id)
                    .await
            }
            Frame::KeyAck { from, .. } => {
                self.sessions.get_or_create(&from).await;
                debug!("reciprocal session ensured peer={}", from.short());
                Ok(())
            }
            Frame::Ciphertext {
                sender,
                ciphertext,
                sender_meta,
                ..
            } => self.handle_ciphertext(&sender, &ciphertext, sender_meta).await,
            Frame::PresenceUpdate { peer, status } => {
                self.update_presence(peer, status).await;
                Ok(())
            }
            Frame::Roster { peers } => {
                self.replace_roster(peers).await;
                Ok(())
            }
        }
    }

    pub async fn poll_once(&self) -> Result<usize, CoreError> {
        self.ensure_open()?;
        let frames = self.relay.pull(&self.config.local_id).await?;
        let count = frames.len();
        for frame in frames {
            let kind = frame.kind();
            if let Err(err) = self.handle_frame(frame).await {
                warn!("frame discarded kind={} err={}", kind, err);
            }
        }
        Ok(count)
    }

    async fn handle_key_request(&self, requester: &PeerId) -> Result<(), CoreError> {
        let bundle = self.prekeys.advertise_new_bundle().await?;
        let frame = key_response_frame(&self.config.local_id, requester, &bundle)?;
        self.relay.send(frame).await?;
        info!("key bundle sent peer={}", requester.short());
        Ok(())
    }

    async fn handle_key_response(
        &self,
        generator: &PeerId,
        key: &str,
        pre_key_id: u32,
        signed_key_id: u32,
    ) -> Result<(), CoreError> {
        let handle = self
            .sessions
            .get(generator)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(generator.clone()))?;
        let mut session = handle.lock().await;
        if apply_key_response(&mut session, key, pre_key_id, signed_key_id).await?
            == ApplyOutcome::AlreadyReady
        {
            return Ok(());
        }
        self.events.publish(CoreEvent::SessionReady {
            peer: generator.clone(),
        });
        let ack = Frame::KeyAck {
            from: self.config.local_id.clone(),
            to: generator.clone(),
        };
        if let Err(err) = self.relay.send(ack).await {
            warn!("key ack not sent peer={} err={}", generator.short(), err);
        }
        self.drain_by_policy(&mut session).await.map(|_| ())
    }

    async fn handle_ciphertext(
        &self,
        sender: &PeerId,
        ciphertext: &str,
        meta: SenderMeta,
    ) -> Result<(), CoreError> {
        let handle = self.sessions.get_or_create(sender).await;
        let mut session = handle.lock().await;
        let opened = match CipherMessage::decode(ciphertext) {
            Ok(message) => session.cipher_mut().decrypt(&message).await,
            Err(err) => Err(err),
        };
        drop(session);
        let plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(err) => {
                let err = CoreError::from(err);
                warn!("inbound frame dropped peer={} err={}", sender.short(), err);
                self.events.publish(CoreEvent::DecryptFailed {
                    peer: sender.clone(),
                    error: err.clone(),
                });
                return Err(err);
            }
        };
        let text = String::from_utf8(plaintext).map_err(|e| CoreError::Codec(e.to_string()))?;
        self.conversations.lock().await.append(
            sender,
            ConversationEntry::received(meta.message_id, sender.clone(), text.clone()),
        );
        self.events.publish(CoreEvent::MessageReceived {
            peer: sender.clone(),
            entry_id: meta.message_id,
            text,
        });
        Ok(())
    }

    pub async fn update_presence(&self, peer: PeerSummary, status: PresenceStatus) {
        if peer.id == self.config.local_id {
            return;
        }
        let id = peer.id.clone();
        self.presence.lock().await.update_presence(peer, status);
        self.events
            .publish(CoreEvent::PresenceChanged { peer: id, status });
    }

    pub async fn replace_roster(&self, peers: Vec<PeerSummary>) {
        let local = &self.config.local_id;
        let peers = peers.into_iter().filter(|p| &p.id != local).collect();
        self.presence.lock().await.replace_roster(peers);
    }

    pub async fn flush(&self, peer: &PeerId) -> Result<usize, CoreError> {
        let handle = self
            .sessions
            .get(peer)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
        let mut session = handle.lock().await;
        self.drain_by_policy(&mut session).await
    }

    pub async fn drain_one(&self, peer: &PeerId) -> Result<DrainOutcome, CoreError> {
        let handle = self
            .sessions
            .get(peer)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
        let mut session = handle.lock().await;
        drain_one(&mut session, &self.delivery_context()).await
    }

    pub async fn try_drain(&self, peer: &PeerId) -> Result<DrainOutcome, CoreError> {
        let handle = self
            .sessions
            .get(peer)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
        let mut session = handle
            .try_lock()
            .map_err(|_| CoreError::DrainInFlight(peer.clone()))?;
        drain_one(&mut session, &self.delivery_context()).await
    }

    pub async fn retry_key_request(&self, peer: &PeerId) -> Result<bool, CoreError> {
        let handle = self
            .sessions
            .get(peer)
            .await
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
        let mut session = handle.lock().await;
        retry_request(&mut session, &self.config.local_id, self.relay.as_ref()).await
    }

    // Drops the session and its cipher; the next send starts a fresh handshake.
    pub async fn reset_session(&self, peer: &PeerId) -> bool {
        let removed = self.sessions.remove(peer).await;
        if removed {
            info!("session reset peer={}", peer.short());
        }
        removed
    }

    pub async fn handshake_state(&self, peer: &PeerId) -> Option<HandshakeState> {
        self.sessions.handshake_state(peer).await
    }

    pub async fn queue_len(&self, peer: &PeerId) -> Option<usize> {
        self.sessions.queue_len(peer).await
    }

    pub async fn pending_texts(&self, peer: &PeerId) -> Vec<String> {
        self.sessions.pending_texts(peer).await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn conversation_peers(&self) -> Vec<PeerId> {
        self.conversations.lock().await.peers()
    }

    pub async fn history(&self, peer: &PeerId) -> Vec<ConversationEntry> {
        self.conversations.lock().await.history(peer)
    }

    pub async fn presence(&self) -> PresenceDirectory {
        self.presence.lock().await.clone()
    }

    pub async fn key_counters(&self) -> LocalKeyCounters {
        self.prekeys.counters().await
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }

    async fn drain_by_policy(&self, session: &mut Session) -> Result<usize, CoreError> {
        let ctx = self.delivery_context();
        match self.config.drain_policy {
            DrainPolicy::DrainOne => match drain_one(session, &ctx).await? {
                DrainOutcome::Delivered(_) => Ok(1),
                DrainOutcome::EmptyQueue => Ok(0),
            },
            DrainPolicy::DrainAll => drain_all(session, &ctx).await,
        }
    }

    fn delivery_context(&self) -> DeliveryContext<'_> {
        DeliveryContext {
            local: &self.config.local_id,
            username: &self.config.username,
            relay: self.relay.as_ref(),
            log: self.conversations.as_ref(),
            events: &self.events,
        }
    }

    async fn start_relay_poller(&self) {
        let cloned = self.clone();
        let interval_ms = self.config.polling_interval_ms;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if let Err(err) = cloned.poll_once().await {
                    warn!("relay poll failed err={}", err);
                }
            }
        });
        *self.poller.lock().await = Some(handle);
    }
}

#[cfg(test)]
mod tests;
