pub mod chain;
mod provider;
pub mod x3dh;

pub use provider::{X3dhCipher, X3dhProvider, DEFAULT_PREKEY_LIMIT};

use crate::error::CryptoError;
use crate::ids::PeerId;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyBundle {
    pub version: u8,
    pub identity_dh: [u8; 32],
    pub identity_signing: [u8; 32],
    pub signed_prekey_id: u32,
    pub signed_prekey: [u8; 32],
    pub signed_prekey_signature: Vec<u8>,
    pub pre_key_id: u32,
    pub one_time_prekey: Option<[u8; 32]>,
}

impl KeyBundle {
    pub fn encode(&self) -> Result<String, CryptoError> {
        let bytes = serde_json::to_vec(self).map_err(|_| CryptoError::InvalidBundle)?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn decode(value: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|_| CryptoError::InvalidBundle)?;
        serde_json::from_slice(&bytes).map_err(|_| CryptoError::InvalidBundle)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitiatorHeader {
    pub identity_dh: [u8; 32],
    pub identity_signing: [u8; 32],
    pub ephemeral: [u8; 32],
    pub signed_prekey_id: u32,
    pub pre_key_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CipherMessage {
    pub header: InitiatorHeader,
    pub counter: u64,
    pub nonce: [u8; 24],
    pub body: Vec<u8>,
}

impl CipherMessage {
    pub fn encode(&self) -> Result<String, CryptoError> {
        let bytes = serde_json::to_vec(self).map_err(|_| CryptoError::Encrypt)?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn decode(value: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD.decode(value).map_err(|_| CryptoError::Decrypt)?;
        serde_json::from_slice(&bytes).map_err(|_| CryptoError::Decrypt)
    }
}

// Per-peer builder and cipher. Owned by exactly one session and never cloned.
#[async_trait]
pub trait PeerCipher: Send {
    async fn process_key_bundle(&mut self, bundle: &KeyBundle) -> Result<(), CryptoError>;
    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<CipherMessage, CryptoError>;
    async fn decrypt(&mut self, message: &CipherMessage) -> Result<Vec<u8>, CryptoError>;
}

pub trait CryptoProvider: Send + Sync {
    fn create_session(&self, peer: &PeerId) -> Box<dyn PeerCipher>;
    fn generate_prekey_bundle(
        &self,
        pre_key_id: u32,
        signed_key_id: u32,
    ) -> Result<KeyBundle, CryptoError>;
}
