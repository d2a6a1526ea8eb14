use crate::ids::PeerId;
use crate::time::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub peer: PeerId,
    pub direction: Direction,
    pub payload: String,
    pub at_ms: u64,
}

impl ConversationEntry {
    pub fn sent(id: Uuid, peer: PeerId, payload: String) -> Self {
        Self {
            id,
            peer,
            direction: Direction::Sent,
            payload,
            at_ms: now_ms(),
        }
    }

    pub fn received(id: Uuid, peer: PeerId, payload: String) -> Self {
        Self {
            id,
            peer,
            direction: Direction::Received,
            payload,
            at_ms: now_ms(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    logs: HashMap<PeerId, Vec<ConversationEntry>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, peer: &PeerId, entry: ConversationEntry) {
        self.logs.entry(peer.clone()).or_default().push(entry);
    }

    pub fn history(&self, peer: &PeerId) -> Vec<ConversationEntry> {
        self.logs.get(peer).cloned().unwrap_or_default()
    }

    pub fn len(&self, peer: &PeerId) -> usize {
        self.logs.get(peer).map(|log| log.len()).unwrap_or(0)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.logs.keys().cloned().collect();
        peers.sort();
        peers
    }
}
