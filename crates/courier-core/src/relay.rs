use crate::error::CoreError;
use crate::frame::Frame;
use crate::ids::PeerId;
use crate::presence::{PeerSummary, PresenceStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), CoreError>;
    async fn pull(&self, local: &PeerId) -> Result<Vec<Frame>, CoreError>;
    async fn close(&self, local: &PeerId) -> Result<(), CoreError>;
}

#[derive(Default)]
struct Hub {
    peers: HashMap<PeerId, PeerSummary>,
    mailboxes: HashMap<PeerId, Vec<Frame>>,
}

impl Hub {
    fn broadcast(&mut self, except: &PeerId, frame: &Frame) {
        for (peer, mailbox) in self.mailboxes.iter_mut() {
            if peer != except {
                mailbox.push(frame.clone());
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRelay {
    hub: Arc<Mutex<Hub>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, summary: PeerSummary) {
        let mut hub = self.hub.lock().await;
        let mut summary = summary;
        summary.online = true;
        let id = summary.id.clone();
        hub.peers.insert(id.clone(), summary.clone());
        hub.mailboxes.entry(id.clone()).or_default();
        let update = Frame::PresenceUpdate {
            peer: summary,
            status: PresenceStatus::Connected,
        };
        hub.broadcast(&id, &update);
        let mut roster: Vec<PeerSummary> = hub
            .peers
            .values()
            .filter(|p| p.id != id)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(mailbox) = hub.mailboxes.get_mut(&id) {
            mailbox.push(Frame::Roster { peers: roster });
        }
    }

    pub async fn disconnect(&self, peer: &PeerId) {
        let mut hub = self.hub.lock().await;
        let Some(summary) = hub.peers.get_mut(peer) else {
            return;
        };
        summary.online = false;
        let update = Frame::PresenceUpdate {
            peer: summary.clone(),
            status: PresenceStatus::Disconnected,
        };
        hub.broadcast(peer, &update);
    }

    pub async fn pending_len(&self, peer: &PeerId) -> usize {
        let hub = self.hub.lock().await;
        hub.mailboxes.get(peer).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Relay for InMemoryRelay {
    async fn send(&self, frame: Frame) -> Result<(), CoreError> {
        let mut hub = self.hub.lock().await;
        match frame.destination().cloned() {
            // Offline peers still get a mailbox so frames wait for their next pull.
            Some(to) => hub.mailboxes.entry(to).or_default().push(frame),
            None => {
                for mailbox in hub.mailboxes.values_mut() {
                    mailbox.push(frame.clone());
                }
            }
        }
        Ok(())
    }

    async fn pull(&self, local: &PeerId) -> Result<Vec<Frame>, CoreError> {
        let mut hub = self.hub.lock().await;
        Ok(hub
            .mailboxes
            .get_mut(local)
            .map(std::mem::take)
            .unwrap_or_default())
    }

    async fn close(&self, local: &PeerId) -> Result<(), CoreError> {
        self.disconnect(local).await;
        Ok(())
    }
}
