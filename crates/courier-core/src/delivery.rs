use crate::conversation::{ConversationEntry, ConversationLog};
use crate::error::CoreError;
use crate::event::{CoreEvent, EventBus};
use crate::frame::{Frame, SenderMeta};
use crate::ids::PeerId;
use crate::relay::Relay;
use crate::session::{HandshakeState, Session};
use log::{debug, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Delivered(Uuid),
    EmptyQueue,
}

pub struct DeliveryContext<'a> {
    pub local: &'a PeerId,
    pub username: &'a str,
    pub relay: &'a dyn Relay,
    pub log: &'a Mutex<ConversationLog>,
    pub events: &'a EventBus,
}

// One dequeue-encrypt-send unit. The caller holds the session lock throughout,
// which is what keeps a single peer's drains strictly sequential.
pub async fn drain_one(
    session: &mut Session,
    ctx: &DeliveryContext<'_>,
) -> Result<DrainOutcome, CoreError> {
    if session.handshake() != HandshakeState::Ready {
        return Err(CoreError::HandshakeNotReady(session.peer().clone()));
    }
    let Some(message) = session.pop_front() else {
        return Ok(DrainOutcome::EmptyQueue);
    };
    let peer = session.peer().clone();
    let sealed = match session.cipher_mut().encrypt(message.text.as_bytes()).await {
        Ok(sealed) => sealed,
        Err(err) => {
            let err = CoreError::from(err);
            warn!("encrypt failed, message dropped peer={} err={}", peer.short(), err);
            ctx.events.publish(CoreEvent::DeliveryFailed {
                peer,
                message_id: message.id,
                error: err.clone(),
            });
            return Err(err);
        }
    };
    let frame = Frame::Ciphertext {
        receiver: peer.clone(),
        sender: ctx.local.clone(),
        ciphertext: sealed.encode()?,
        sender_meta: SenderMeta {
            message_id: message.id,
            username: ctx.username.to_string(),
            created_at_ms: message.created_at_ms,
        },
    };
    // The chain step is already spent, so a failed send is not requeued either.
    if let Err(err) = ctx.relay.send(frame).await {
        warn!("send failed, message dropped peer={} err={}", peer.short(), err);
        ctx.events.publish(CoreEvent::DeliveryFailed {
            peer,
            message_id: message.id,
            error: err.clone(),
        });
        return Err(err);
    }
    ctx.log
        .lock()
        .await
        .append(&peer, ConversationEntry::sent(message.id, peer.clone(), message.text));
    debug!("delivered peer={} message={}", peer.short(), message.id);
    ctx.events.publish(CoreEvent::MessageSent {
        peer,
        message_id: message.id,
    });
    Ok(DrainOutcome::Delivered(message.id))
}

pub async fn drain_all(session: &mut Session, ctx: &DeliveryContext<'_>) -> Result<usize, CoreError> {
    let mut delivered = 0;
    while let DrainOutcome::Delivered(_) = drain_one(session, ctx).await? {
        delivered += 1;
    }
    Ok(delivered)
}
