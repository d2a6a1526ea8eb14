use crate::crypto::chain::{ChainState, INITIATOR_CHAIN};
use crate::crypto::x3dh::{
    generate_ephemeral, generate_identity_keypair, generate_one_time_prekey,
    generate_signed_prekey, make_bundle, x3dh_initiator, x3dh_responder, IdentityKeyPair,
    OneTimePreKeyPair, SignedPreKeyPair,
};
use crate::crypto::{CipherMessage, CryptoProvider, InitiatorHeader, KeyBundle, PeerCipher};
use crate::error::CryptoError;
use crate::ids::PeerId;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use log::{debug, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_PREKEY_LIMIT: usize = 100;

const MAX_INBOUND_CHAINS: usize = 8;

// Keys by id in insertion order; the oldest go once the limit is passed.
struct BoundedKeys<T> {
    keys: HashMap<u32, T>,
    order: VecDeque<u32>,
    limit: usize,
}

impl<T: Clone> BoundedKeys<T> {
    fn new(limit: usize) -> Self {
        Self {
            keys: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn get(&self, id: u32) -> Option<T> {
        self.keys.get(&id).cloned()
    }

    fn contains(&self, id: u32) -> bool {
        self.keys.contains_key(&id)
    }

    fn insert(&mut self, id: u32, key: T) {
        if self.keys.insert(id, key).is_none() {
            self.order.push_back(id);
        }
        while self.keys.len() > self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.keys.remove(&oldest);
            debug!("prekey evicted id={}", oldest);
        }
    }

    fn remove(&mut self, id: u32) {
        if self.keys.remove(&id).is_some() {
            self.order.retain(|k| *k != id);
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

struct LocalKeyStore {
    identity: IdentityKeyPair,
    signed_prekeys: Mutex<BoundedKeys<SignedPreKeyPair>>,
    one_time_prekeys: Mutex<BoundedKeys<OneTimePreKeyPair>>,
}

impl LocalKeyStore {
    fn signed_prekey(&self, id: u32) -> Result<SignedPreKeyPair, CryptoError> {
        lock(&self.signed_prekeys)
            .get(id)
            .ok_or(CryptoError::MissingPreKey(id))
    }

    fn one_time_prekey(&self, id: u32) -> Result<OneTimePreKeyPair, CryptoError> {
        lock(&self.one_time_prekeys)
            .get(id)
            .ok_or(CryptoError::MissingPreKey(id))
    }

    fn consume_one_time_prekey(&self, id: u32) {
        lock(&self.one_time_prekeys).remove(id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct X3dhProvider {
    store: Arc<LocalKeyStore>,
}

impl Default for X3dhProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl X3dhProvider {
    pub fn new() -> Self {
        Self::with_prekey_limit(DEFAULT_PREKEY_LIMIT)
    }

    // Bounds both prekey stores so unanswered key requests cannot grow them.
    pub fn with_prekey_limit(limit: usize) -> Self {
        Self {
            store: Arc::new(LocalKeyStore {
                identity: generate_identity_keypair(),
                signed_prekeys: Mutex::new(BoundedKeys::new(limit)),
                one_time_prekeys: Mutex::new(BoundedKeys::new(limit)),
            }),
        }
    }

    pub fn one_time_prekeys_available(&self) -> usize {
        lock(&self.store.one_time_prekeys).len()
    }

    pub fn signed_prekeys_available(&self) -> usize {
        lock(&self.store.signed_prekeys).len()
    }
}

impl CryptoProvider for X3dhProvider {
    fn create_session(&self, peer: &PeerId) -> Box<dyn PeerCipher> {
        Box::new(X3dhCipher {
            peer: peer.clone(),
            store: self.store.clone(),
            pinned: None,
            outbound: None,
            inbound: VecDeque::new(),
        })
    }

    fn generate_prekey_bundle(
        &self,
        pre_key_id: u32,
        signed_key_id: u32,
    ) -> Result<KeyBundle, CryptoError> {
        if lock(&self.store.one_time_prekeys).contains(pre_key_id) {
            return Err(CryptoError::InvalidBundle);
        }
        let signed = {
            let mut signed_prekeys = lock(&self.store.signed_prekeys);
            match signed_prekeys.get(signed_key_id) {
                Some(existing) => existing,
                None => {
                    let fresh = generate_signed_prekey(&self.store.identity, signed_key_id);
                    signed_prekeys.insert(signed_key_id, fresh.clone());
                    fresh
                }
            }
        };
        let one_time = generate_one_time_prekey(pre_key_id);
        let bundle = make_bundle(&self.store.identity, &signed, &one_time);
        lock(&self.store.one_time_prekeys).insert(pre_key_id, one_time);
        Ok(bundle)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PeerIdentity {
    dh: [u8; 32],
    signing: [u8; 32],
}

impl PeerIdentity {
    fn of_bundle(bundle: &KeyBundle) -> Self {
        Self {
            dh: bundle.identity_dh,
            signing: bundle.identity_signing,
        }
    }

    fn of_header(header: &InitiatorHeader) -> Self {
        Self {
            dh: header.identity_dh,
            signing: header.identity_signing,
        }
    }
}

struct OutboundChain {
    header: InitiatorHeader,
    chain: ChainState,
    associated_data: Vec<u8>,
}

struct InboundChain {
    ephemeral: [u8; 32],
    chain: ChainState,
    associated_data: Vec<u8>,
    seen: HashSet<u64>,
}

pub struct X3dhCipher {
    peer: PeerId,
    store: Arc<LocalKeyStore>,
    // Trusted on first use, from either a processed bundle or an inbound header.
    pinned: Option<PeerIdentity>,
    outbound: Option<OutboundChain>,
    inbound: VecDeque<InboundChain>,
}

impl X3dhCipher {
    fn check_identity(&self, claimed: PeerIdentity) -> Result<(), CryptoError> {
        match self.pinned {
            Some(pinned) if pinned != claimed => {
                warn!("peer identity changed peer={}", self.peer.short());
                Err(CryptoError::IdentityMismatch)
            }
            _ => Ok(()),
        }
    }

    fn open_with(
        chain: &ChainState,
        associated_data: &[u8],
        message: &CipherMessage,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = chain.key_at(message.counter);
        let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
        let aad = message_ad(associated_data, message.counter);
        cipher
            .decrypt(
                XNonce::from_slice(&message.nonce),
                Payload {
                    msg: &message.body,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Decrypt)
    }

    fn establish_inbound(&self, message: &CipherMessage) -> Result<(InboundChain, Vec<u8>), CryptoError> {
        let header = &message.header;
        let signed = self.store.signed_prekey(header.signed_prekey_id)?;
        let one_time = match header.pre_key_id {
            Some(id) => Some(self.store.one_time_prekey(id)?),
            None => None,
        };
        let output = x3dh_responder(&self.store.identity, &signed, one_time.as_ref(), header)?;
        let chain = ChainState::from_root(&output.root_key, INITIATOR_CHAIN);
        let plaintext = Self::open_with(&chain, &output.associated_data, message)?;
        if let Some(id) = header.pre_key_id {
            self.store.consume_one_time_prekey(id);
        }
        Ok((
            InboundChain {
                ephemeral: header.ephemeral,
                chain,
                associated_data: output.associated_data,
                seen: HashSet::new(),
            },
            plaintext,
        ))
    }
}

#[async_trait]
impl PeerCipher for X3dhCipher {
    async fn process_key_bundle(&mut self, bundle: &KeyBundle) -> Result<(), CryptoError> {
        let identity = PeerIdentity::of_bundle(bundle);
        self.check_identity(identity)?;
        let ephemeral = generate_ephemeral();
        let output = x3dh_initiator(&self.store.identity, &ephemeral, bundle)?;
        let header = InitiatorHeader {
            identity_dh: self.store.identity.dh_public,
            identity_signing: self.store.identity.signing_public(),
            ephemeral: ephemeral.public,
            signed_prekey_id: bundle.signed_prekey_id,
            pre_key_id: bundle.one_time_prekey.map(|_| bundle.pre_key_id),
        };
        self.outbound = Some(OutboundChain {
            header,
            chain: ChainState::from_root(&output.root_key, INITIATOR_CHAIN),
            associated_data: output.associated_data,
        });
        self.pinned = Some(identity);
        debug!("outbound chain established peer={}", self.peer.short());
        Ok(())
    }

    async fn encrypt(&mut self, plaintext: &[u8]) -> Result<CipherMessage, CryptoError> {
        let outbound = self.outbound.as_mut().ok_or(CryptoError::NoSession)?;
        let (counter, key) = outbound.chain.next_key();
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut nonce);
        let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)?;
        let aad = message_ad(&outbound.associated_data, counter);
        let body = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(CipherMessage {
            header: outbound.header.clone(),
            counter,
            nonce,
            body,
        })
    }

    async fn decrypt(&mut self, message: &CipherMessage) -> Result<Vec<u8>, CryptoError> {
        let claimed = PeerIdentity::of_header(&message.header);
        self.check_identity(claimed)?;
        if let Some(inbound) = self
            .inbound
            .iter_mut()
            .find(|chain| chain.ephemeral == message.header.ephemeral)
        {
            if inbound.seen.contains(&message.counter) {
                return Err(CryptoError::Decrypt);
            }
            let plaintext = Self::open_with(&inbound.chain, &inbound.associated_data, message)?;
            inbound.seen.insert(message.counter);
            return Ok(plaintext);
        }
        let (mut inbound, plaintext) = self.establish_inbound(message)?;
        inbound.seen.insert(message.counter);
        self.inbound.push_back(inbound);
        if self.inbound.len() > MAX_INBOUND_CHAINS {
            self.inbound.pop_front();
        }
        self.pinned = Some(claimed);
        debug!(
            "inbound chain established peer={} chains={}",
            self.peer.short(),
            self.inbound.len()
        );
        Ok(plaintext)
    }
}

fn message_ad(associated_data: &[u8], counter: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(associated_data.len() + 8);
    aad.extend_from_slice(associated_data);
    aad.extend_from_slice(&counter.to_be_bytes());
    aad
}
