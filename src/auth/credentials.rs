use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

use crate::api::error::ApiError;
use crate::config::AuthConfig;
use crate::models::TokenPair;

const ACCESS_KEY: &str = "access_token";
const REFRESH_KEY: &str = "refresh_token";

/// Durable storage for the single active access/refresh pair.
///
/// All implementations are safe for concurrent use and perform no network
/// I/O. `current_access_token` sits on the hot path of every outgoing
/// request and never fails.
pub trait TokenStore: Send + Sync {
    /// Persists both tokens atomically. Rejects pairs with an empty token:
    /// a partial session must never be stored.
    fn save_tokens(&self, pair: &TokenPair) -> Result<(), ApiError>;

    /// Returns the stored pair, or `NotFound` if there is no session.
    fn load_tokens(&self) -> Result<TokenPair, ApiError>;

    /// Removes both tokens. Idempotent; absence is not an error.
    fn clear(&self) -> Result<(), ApiError>;

    fn current_access_token(&self) -> Option<String>;

    /// Existence check. A mirror answers without touching the backend; a
    /// cold keyring has no metadata-only lookup, so the first call reads
    /// the secret and discards it.
    fn has_refresh_token(&self) -> bool;
}

/// Platform credential-manager store. Secrets live in the OS keyring under
/// one service name; a mutexed in-memory mirror keeps the hot path off the
/// keyring after the first read.
pub struct KeyringTokenStore {
    service: String,
    mirror: Mutex<TokenPair>,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            mirror: Mutex::new(TokenPair::default()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, ApiError> {
        Entry::new(&self.service, key).map_err(ApiError::storage)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenPair> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Splits "the secret is absent" from "the keyring is broken". Only
/// `NoEntry` means absent; a locked or misconfigured keyring must not be
/// mistaken for a logged-out state.
fn classify_secret(res: keyring::Result<String>) -> Result<Option<String>, ApiError> {
    match res {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(ApiError::storage(err)),
    }
}

impl TokenStore for KeyringTokenStore {
    fn save_tokens(&self, pair: &TokenPair) -> Result<(), ApiError> {
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(ApiError::validation("both tokens are required"));
        }
        let mut mirror = self.lock();
        self.entry(ACCESS_KEY)?
            .set_password(&pair.access_token)
            .map_err(ApiError::storage)?;
        self.entry(REFRESH_KEY)?
            .set_password(&pair.refresh_token)
            .map_err(ApiError::storage)?;
        *mirror = pair.clone();
        Ok(())
    }

    fn load_tokens(&self) -> Result<TokenPair, ApiError> {
        let mut mirror = self.lock();
        if !mirror.access_token.is_empty() && !mirror.refresh_token.is_empty() {
            return Ok(mirror.clone());
        }
        let access = classify_secret(self.entry(ACCESS_KEY)?.get_password())?
            .ok_or_else(|| ApiError::NotFound("no stored tokens".into()))?;
        let refresh = classify_secret(self.entry(REFRESH_KEY)?.get_password())?
            .ok_or_else(|| ApiError::NotFound("no stored tokens".into()))?;
        mirror.access_token = access;
        mirror.refresh_token = refresh;
        Ok(mirror.clone())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut mirror = self.lock();
        for key in [ACCESS_KEY, REFRESH_KEY] {
            if let Err(err) = self.entry(key)?.delete_credential() {
                debug!(key, error = %err, "keyring delete skipped");
            }
        }
        *mirror = TokenPair::default();
        Ok(())
    }

    fn current_access_token(&self) -> Option<String> {
        let mut mirror = self.lock();
        if !mirror.access_token.is_empty() {
            return Some(mirror.access_token.clone());
        }
        let token = classify_secret(self.entry(ACCESS_KEY).ok()?.get_password())
            .ok()
            .flatten()?;
        if token.is_empty() {
            return None;
        }
        mirror.access_token = token.clone();
        Some(token)
    }

    fn has_refresh_token(&self) -> bool {
        let mirror = self.lock();
        if !mirror.refresh_token.is_empty() {
            return true;
        }
        self.entry(REFRESH_KEY)
            .map(|e| matches!(classify_secret(e.get_password()), Ok(Some(_))))
            .unwrap_or(false)
    }
}

/// In-process store: the `memory` backend and the test double.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TokenPair>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn save_tokens(&self, pair: &TokenPair) -> Result<(), ApiError> {
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(ApiError::validation("both tokens are required"));
        }
        *self.lock() = Some(pair.clone());
        Ok(())
    }

    fn load_tokens(&self) -> Result<TokenPair, ApiError> {
        self.lock()
            .clone()
            .ok_or_else(|| ApiError::NotFound("no stored tokens".into()))
    }

    fn clear(&self) -> Result<(), ApiError> {
        *self.lock() = None;
        Ok(())
    }

    fn current_access_token(&self) -> Option<String> {
        self.lock().as_ref().map(|p| p.access_token.clone())
    }

    fn has_refresh_token(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|p| !p.refresh_token.is_empty())
            .unwrap_or(false)
    }
}

/// Select the credential-store backend from config. Anything other than
/// `memory` uses the platform keyring.
pub fn open_store(cfg: &AuthConfig) -> std::sync::Arc<dyn TokenStore> {
    if cfg.backend == "memory" {
        std::sync::Arc::new(MemoryTokenStore::default())
    } else {
        std::sync::Arc::new(KeyringTokenStore::new(cfg.service.clone()))
    }
}
