use crate::crypto::{CryptoProvider, KeyBundle};
use crate::error::CoreError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalKeyCounters {
    pub pre_key_id: u32,
    pub signed_key_id: u32,
}

impl Default for LocalKeyCounters {
    fn default() -> Self {
        Self {
            pre_key_id: 1,
            signed_key_id: 1,
        }
    }
}

impl LocalKeyCounters {
    fn next(self) -> Self {
        Self {
            pre_key_id: self.pre_key_id.wrapping_add(1).max(1),
            signed_key_id: self.signed_key_id.wrapping_add(1).max(1),
        }
    }
}

#[derive(Clone)]
pub struct PrekeyTracker {
    crypto: Arc<dyn CryptoProvider>,
    counters: Arc<Mutex<LocalKeyCounters>>,
}

impl PrekeyTracker {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            crypto,
            counters: Arc::new(Mutex::new(LocalKeyCounters::default())),
        }
    }

    pub async fn counters(&self) -> LocalKeyCounters {
        *self.counters.lock().await
    }

    // Always asks the provider for fresh material; a bundle is never reused.
    pub async fn advertise_new_bundle(&self) -> Result<KeyBundle, CoreError> {
        let mut guard = self.counters.lock().await;
        let next = guard.next();
        let bundle = self
            .crypto
            .generate_prekey_bundle(next.pre_key_id, next.signed_key_id)?;
        *guard = next;
        debug!(
            "advertised bundle pre_key_id={} signed_key_id={}",
            next.pre_key_id, next.signed_key_id
        );
        Ok(bundle)
    }
}
