use crate::ids::PeerId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    DrainOne,
    DrainAll,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        DrainPolicy::DrainAll
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    pub local_id: PeerId,
    pub username: String,
    #[serde(default)]
    pub drain_policy: DrainPolicy,
    #[serde(default)]
    pub max_queue_len: Option<usize>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub polling_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            local_id: PeerId::new("local"),
            username: "anonymous".to_string(),
            drain_policy: DrainPolicy::DrainAll,
            max_queue_len: None,
            event_buffer: default_event_buffer(),
            polling_interval_ms: 0,
        }
    }
}

impl CoreConfig {
    pub fn for_peer(local_id: PeerId, username: impl Into<String>) -> Self {
        Self {
            local_id,
            username: username.into(),
            ..Self::default()
        }
    }
}

fn default_event_buffer() -> usize {
    256
}
