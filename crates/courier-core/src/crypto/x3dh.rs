use crate::crypto::{InitiatorHeader, KeyBundle};
use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

pub const BUNDLE_VERSION: u8 = 1;

#[derive(Clone)]
pub struct IdentityKeyPair {
    pub dh_private: StaticSecret,
    pub dh_public: [u8; 32],
    pub signing: SigningKey,
}

impl IdentityKeyPair {
    pub fn signing_public(&self) -> [u8; 32] {
        VerifyingKey::from(&self.signing).to_bytes()
    }
}

#[derive(Clone)]
pub struct SignedPreKeyPair {
    pub id: u32,
    pub private: StaticSecret,
    pub public: [u8; 32],
    pub signature: Signature,
}

#[derive(Clone)]
pub struct OneTimePreKeyPair {
    pub id: u32,
    pub private: StaticSecret,
    pub public: [u8; 32],
}

pub struct EphemeralKeyPair {
    pub private: StaticSecret,
    pub public: [u8; 32],
}

pub struct X3dhOutput {
    pub root_key: [u8; 32],
    pub associated_data: Vec<u8>,
}

pub fn generate_identity_keypair() -> IdentityKeyPair {
    let dh_private = StaticSecret::random_from_rng(OsRng);
    let dh_public = X25519Public::from(&dh_private).to_bytes();
    let signing = SigningKey::generate(&mut OsRng);
    IdentityKeyPair {
        dh_private,
        dh_public,
        signing,
    }
}

pub fn generate_signed_prekey(identity: &IdentityKeyPair, id: u32) -> SignedPreKeyPair {
    let private = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&private).to_bytes();
    let signature = identity.signing.sign(&public);
    SignedPreKeyPair {
        id,
        private,
        public,
        signature,
    }
}

pub fn generate_one_time_prekey(id: u32) -> OneTimePreKeyPair {
    let private = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&private).to_bytes();
    OneTimePreKeyPair { id, private, public }
}

pub fn generate_ephemeral() -> EphemeralKeyPair {
    let private = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&private).to_bytes();
    EphemeralKeyPair { private, public }
}

pub fn make_bundle(
    identity: &IdentityKeyPair,
    signed_prekey: &SignedPreKeyPair,
    one_time_prekey: &OneTimePreKeyPair,
) -> KeyBundle {
    KeyBundle {
        version: BUNDLE_VERSION,
        identity_dh: identity.dh_public,
        identity_signing: identity.signing_public(),
        signed_prekey_id: signed_prekey.id,
        signed_prekey: signed_prekey.public,
        signed_prekey_signature: signed_prekey.signature.to_bytes().to_vec(),
        pre_key_id: one_time_prekey.id,
        one_time_prekey: Some(one_time_prekey.public),
    }
}

pub fn verify_bundle(bundle: &KeyBundle) -> Result<(), CryptoError> {
    if bundle.version != BUNDLE_VERSION {
        return Err(CryptoError::InvalidBundle);
    }
    let verifying = VerifyingKey::from_bytes(&bundle.identity_signing)
        .map_err(|_| CryptoError::InvalidBundle)?;
    let signature = Signature::from_slice(&bundle.signed_prekey_signature)
        .map_err(|_| CryptoError::InvalidBundle)?;
    verifying
        .verify_strict(&bundle.signed_prekey, &signature)
        .map_err(|_| CryptoError::SignatureMismatch)
}

pub fn x3dh_initiator(
    initiator: &IdentityKeyPair,
    ephemeral: &EphemeralKeyPair,
    bundle: &KeyBundle,
) -> Result<X3dhOutput, CryptoError> {
    verify_bundle(bundle)?;
    let dh1 = initiator
        .dh_private
        .diffie_hellman(&X25519Public::from(bundle.signed_prekey));
    let dh2 = ephemeral
        .private
        .diffie_hellman(&X25519Public::from(bundle.identity_dh));
    let dh3 = ephemeral
        .private
        .diffie_hellman(&X25519Public::from(bundle.signed_prekey));
    let dh4 = bundle
        .one_time_prekey
        .map(|opk| ephemeral.private.diffie_hellman(&X25519Public::from(opk)));
    let root_key = kdf_x3dh(&[
        dh1.as_bytes(),
        dh2.as_bytes(),
        dh3.as_bytes(),
        dh4.as_ref().map(|d| d.as_bytes().as_slice()).unwrap_or(&[]),
    ])?;
    Ok(X3dhOutput {
        root_key,
        associated_data: build_ad(
            &bundle.identity_dh,
            &initiator.signing_public(),
            &initiator.dh_public,
        ),
    })
}

pub fn x3dh_responder(
    responder: &IdentityKeyPair,
    signed_prekey: &SignedPreKeyPair,
    one_time_prekey: Option<&OneTimePreKeyPair>,
    header: &InitiatorHeader,
) -> Result<X3dhOutput, CryptoError> {
    let dh1 = signed_prekey
        .private
        .diffie_hellman(&X25519Public::from(header.identity_dh));
    let dh2 = responder
        .dh_private
        .diffie_hellman(&X25519Public::from(header.ephemeral));
    let dh3 = signed_prekey
        .private
        .diffie_hellman(&X25519Public::from(header.ephemeral));
    let dh4 = one_time_prekey.map(|opk| {
        opk.private
            .diffie_hellman(&X25519Public::from(header.ephemeral))
    });
    let root_key = kdf_x3dh(&[
        dh1.as_bytes(),
        dh2.as_bytes(),
        dh3.as_bytes(),
        dh4.as_ref().map(|d| d.as_bytes().as_slice()).unwrap_or(&[]),
    ])?;
    Ok(X3dhOutput {
        root_key,
        associated_data: build_ad(
            &responder.dh_public,
            &header.identity_signing,
            &header.identity_dh,
        ),
    })
}

fn kdf_x3dh(inputs: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
    let mut accum = Vec::with_capacity(32 * inputs.len());
    for input in inputs {
        accum.extend_from_slice(input);
    }
    let hkdf = Hkdf::<Sha256>::new(None, &accum);
    let mut okm = [0u8; 32];
    hkdf.expand(b"courier:x3dh:v1", &mut okm)
        .map_err(|_| CryptoError::InvalidBundle)?;
    Ok(okm)
}

fn build_ad(
    responder_identity: &[u8; 32],
    initiator_signing: &[u8; 32],
    initiator_dh: &[u8; 32],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(96);
    out.extend_from_slice(responder_identity);
    out.extend_from_slice(initiator_signing);
    out.extend_from_slice(initiator_dh);
    out
}
