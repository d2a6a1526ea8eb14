use crate::ids::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    pub username: String,
    #[serde(default)]
    pub online: bool,
}

impl PeerSummary {
    pub fn new(id: PeerId, username: impl Into<String>, online: bool) -> Self {
        Self {
            id,
            username: username.into(),
            online,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    #[serde(rename = "user-connected")]
    Connected,
    #[serde(rename = "user-disconnected")]
    Disconnected,
}

impl PresenceStatus {
    pub fn parse(value: &str) -> Self {
        if value == "user-connected" {
            PresenceStatus::Connected
        } else {
            PresenceStatus::Disconnected
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, PresenceStatus::Connected)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceDirectory {
    online: HashMap<PeerId, PeerSummary>,
    offline: HashMap<PeerId, PeerSummary>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_presence(&mut self, summary: PeerSummary, status: PresenceStatus) {
        let online = status.is_online();
        let mut summary = summary;
        summary.online = online;
        let id = summary.id.clone();
        if online {
            self.offline.remove(&id);
            self.online.insert(id, summary);
        } else {
            self.online.remove(&id);
            self.offline.insert(id, summary);
        }
    }

    pub fn replace_roster(&mut self, all: Vec<PeerSummary>) {
        self.online.clear();
        self.offline.clear();
        for summary in all {
            let id = summary.id.clone();
            if summary.online {
                self.offline.remove(&id);
                self.online.insert(id, summary);
            } else {
                self.online.remove(&id);
                self.offline.insert(id, summary);
            }
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerSummary> {
        self.online.get(peer).or_else(|| self.offline.get(peer))
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.online.contains_key(peer)
    }

    pub fn online(&self) -> Vec<PeerSummary> {
        sorted(self.online.values())
    }

    pub fn offline(&self) -> Vec<PeerSummary> {
        sorted(self.offline.values())
    }

    pub fn len(&self) -> usize {
        self.online.len() + self.offline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted<'a>(values: impl Iterator<Item = &'a PeerSummary>) -> Vec<PeerSummary> {
    let mut out: Vec<PeerSummary> = values.cloned().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}
