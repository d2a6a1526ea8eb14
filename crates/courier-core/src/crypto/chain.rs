use blake3::Hasher;
use hkdf::Hkdf;
use sha2::Sha256;

pub const INITIATOR_CHAIN: &[u8] = b"courier:chain:initiator:v1";

#[derive(Clone, Debug)]
pub struct ChainState {
    seed: [u8; 32],
    counter: u64,
}

impl ChainState {
    pub fn from_root(root_key: &[u8; 32], label: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, root_key);
        let mut seed = [0u8; 32];
        // 32 bytes is always a valid HKDF-SHA256 output length.
        let _ = hkdf.expand(label, &mut seed);
        Self { seed, counter: 0 }
    }

    pub fn next_key(&mut self) -> (u64, [u8; 32]) {
        self.counter = self.counter.saturating_add(1);
        (self.counter, self.key_at(self.counter))
    }

    pub fn key_at(&self, counter: u64) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(b"courier:message-key");
        hasher.update(&self.seed);
        hasher.update(&counter.to_be_bytes());
        hasher.finalize().into()
    }
}
