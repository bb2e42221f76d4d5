use keyring::Entry;
use rand::RngCore;
use tracing::debug;

use crate::api::error::ApiError;

pub const KEY_LEN: usize = 32;

const KEY_NAME: &str = "cache_key";

/// Source of the cache encryption key. Implementations must be cheap enough
/// to call once per encrypt/decrypt, since the key is never held beyond a
/// single operation.
pub trait KeyProvider: Send + Sync {
    fn key(&self) -> Result<[u8; KEY_LEN], ApiError>;
}

/// Per-installation key in the platform keyring, generated lazily on first
/// use and stored hex-encoded under the configured service name.
pub struct KeyringKeyProvider {
    service: String,
}

impl KeyringKeyProvider {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, ApiError> {
        Entry::new(&self.service, KEY_NAME).map_err(ApiError::storage)
    }
}

impl KeyProvider for KeyringKeyProvider {
    fn key(&self) -> Result<[u8; KEY_LEN], ApiError> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(stored) => decode_key(&stored),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "generating cache encryption key");
                let mut key = [0u8; KEY_LEN];
                rand::rngs::OsRng.fill_bytes(&mut key);
                entry
                    .set_password(&hex::encode(key))
                    .map_err(ApiError::storage)?;
                Ok(key)
            }
            Err(err) => Err(ApiError::storage(err)),
        }
    }
}

/// Fixed in-process key for tests and the `memory` credential backend.
pub struct StaticKeyProvider(pub [u8; KEY_LEN]);

impl KeyProvider for StaticKeyProvider {
    fn key(&self) -> Result<[u8; KEY_LEN], ApiError> {
        Ok(self.0)
    }
}

fn decode_key(stored: &str) -> Result<[u8; KEY_LEN], ApiError> {
    let bytes = hex::decode(stored)
        .map_err(|_| ApiError::Storage("cache key in keyring is not valid hex".into()))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::Storage("cache key in keyring has the wrong length".into()))
}
