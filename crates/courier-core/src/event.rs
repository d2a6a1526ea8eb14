use crate::error::CoreError;
use crate::ids::PeerId;
use crate::presence::PresenceStatus;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    MessageReceived {
        peer: PeerId,
        entry_id: Uuid,
        text: String,
    },
    MessageSent {
        peer: PeerId,
        message_id: Uuid,
    },
    SessionReady {
        peer: PeerId,
    },
    DecryptFailed {
        peer: PeerId,
        error: CoreError,
    },
    DeliveryFailed {
        peer: PeerId,
        message_id: Uuid,
        error: CoreError,
    },
    PresenceChanged {
        peer: PeerId,
        status: PresenceStatus,
    },
}

pub type EventReceiver = broadcast::Receiver<CoreEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}
