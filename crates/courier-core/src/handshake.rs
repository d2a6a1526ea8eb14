use crate::crypto::KeyBundle;
use crate::error::{CoreError, CryptoError};
use crate::frame::Frame;
use crate::ids::PeerId;
use crate::relay::Relay;
use crate::session::{HandshakeState, Session};
use log::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AlreadyReady,
}

// Emits a key request only on the Uninitialized -> KeyRequested transition.
pub async fn request_key(
    session: &mut Session,
    local: &PeerId,
    relay: &dyn Relay,
) -> Result<bool, CoreError> {
    if !session.mark_key_requested() {
        return Ok(false);
    }
    if let Err(err) = send_request(session.peer(), local, relay).await {
        session.mark_uninitialized();
        return Err(err);
    }
    info!("key requested peer={}", session.peer().short());
    Ok(true)
}

// Explicit caller retry for a stalled handshake; never scheduled automatically.
pub async fn retry_request(
    session: &mut Session,
    local: &PeerId,
    relay: &dyn Relay,
) -> Result<bool, CoreError> {
    match session.handshake() {
        HandshakeState::Uninitialized => request_key(session, local, relay).await,
        HandshakeState::KeyRequested => {
            send_request(session.peer(), local, relay).await?;
            info!("key request retried peer={}", session.peer().short());
            Ok(true)
        }
        HandshakeState::Ready => Ok(false),
    }
}

async fn send_request(peer: &PeerId, local: &PeerId, relay: &dyn Relay) -> Result<(), CoreError> {
    relay
        .send(Frame::KeyRequest {
            requesting_peer: local.clone(),
            target_peer: peer.clone(),
        })
        .await
}

pub async fn apply_key_response(
    session: &mut Session,
    key: &str,
    pre_key_id: u32,
    signed_key_id: u32,
) -> Result<ApplyOutcome, CoreError> {
    match session.handshake() {
        HandshakeState::Uninitialized => {
            return Err(CoreError::UnsolicitedKeyResponse(session.peer().clone()))
        }
        HandshakeState::Ready => {
            debug!("duplicate key response ignored peer={}", session.peer().short());
            return Ok(ApplyOutcome::AlreadyReady);
        }
        HandshakeState::KeyRequested => {}
    }
    let bundle = KeyBundle::decode(key)?;
    if bundle.pre_key_id != pre_key_id || bundle.signed_prekey_id != signed_key_id {
        return Err(CryptoError::InvalidBundle.into());
    }
    session.cipher_mut().process_key_bundle(&bundle).await?;
    session.mark_ready();
    info!("session ready peer={}", session.peer().short());
    Ok(ApplyOutcome::Applied)
}

pub fn key_response_frame(
    local: &PeerId,
    requester: &PeerId,
    bundle: &KeyBundle,
) -> Result<Frame, CoreError> {
    Ok(Frame::KeyResponse {
        recipient: requester.clone(),
        generator_id: local.clone(),
        key: bundle.encode()?,
        pre_key_id: bundle.pre_key_id,
        signed_key_id: bundle.signed_prekey_id,
    })
}
