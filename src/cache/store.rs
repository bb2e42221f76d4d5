use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::keys::{KeyProvider, KEY_LEN};
use crate::api::error::ApiError;

const NONCE_LEN: usize = 24;

/// One decrypted cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub meta: String,
    pub updated_at: DateTime<Utc>,
}

/// Key/value store of prior read responses, one row per cache key.
///
/// A single connection serialized behind a mutex gives the single-writer
/// discipline WAL expects from this process. Corrupt or tampered ciphertext
/// surfaces as `CacheCorruption`, never as a silent miss.
pub struct CacheStore {
    conn: Mutex<Connection>,
    keys: Arc<dyn KeyProvider>,
    ttl: Duration,
}

impl CacheStore {
    pub fn open(
        path: &Path,
        keys: Arc<dyn KeyProvider>,
        ttl_minutes: i64,
    ) -> Result<Self, ApiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ApiError::storage)?;
        }
        let conn = Connection::open(path).map_err(ApiError::storage)?;
        // journal_mode returns a row, so pragma_update would error on it.
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
            row.get::<_, String>(0)
        })
        .map_err(ApiError::storage)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(ApiError::storage)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                key        TEXT PRIMARY KEY,
                payload    BLOB NOT NULL,
                meta       TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(ApiError::storage)?;

        Ok(Self {
            conn: Mutex::new(conn),
            keys,
            ttl: Duration::minutes(ttl_minutes),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Encrypts and upserts, stamping the current time.
    pub fn put(&self, key: &str, payload: &[u8], meta: &str) -> Result<(), ApiError> {
        let sealed = seal(&self.keys.key()?, payload)?;
        self.lock()
            .execute(
                "INSERT INTO response_cache (key, payload, meta, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     payload = excluded.payload,
                     meta = excluded.meta,
                     updated_at = excluded.updated_at",
                params![key, sealed, meta, Utc::now().timestamp()],
            )
            .map_err(ApiError::storage)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<CacheEntry, ApiError> {
        let row: Option<(Vec<u8>, String, i64)> = self
            .lock()
            .query_row(
                "SELECT payload, meta, updated_at FROM response_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(ApiError::storage)?;

        let (sealed, meta, stamp) = row.ok_or_else(|| ApiError::NotFound(key.to_string()))?;
        let payload = open(&self.keys.key()?, &sealed)?;
        let updated_at = Utc
            .timestamp_opt(stamp, 0)
            .single()
            .ok_or_else(|| ApiError::CacheCorruption(format!("bad timestamp for key {key}")))?;
        Ok(CacheEntry {
            payload,
            meta,
            updated_at,
        })
    }

    pub fn delete(&self, key: &str) -> Result<(), ApiError> {
        self.lock()
            .execute("DELETE FROM response_cache WHERE key = ?1", params![key])
            .map_err(ApiError::storage)?;
        Ok(())
    }

    /// Removes every entry whose key starts with `prefix`.
    pub fn delete_prefix(&self, prefix: &str) -> Result<(), ApiError> {
        let removed = self
            .lock()
            .execute(
                "DELETE FROM response_cache
                 WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )
            .map_err(ApiError::storage)?;
        debug!(prefix, removed, "invalidated cache entries");
        Ok(())
    }

    /// Whether an entry stamped at `updated_at` may still serve as a
    /// fallback. A non-positive TTL never counts as fresh.
    pub fn is_fresh(&self, updated_at: DateTime<Utc>) -> bool {
        if self.ttl <= Duration::zero() {
            return false;
        }
        Utc::now() - updated_at <= self.ttl
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, updated_at: DateTime<Utc>) {
        self.lock()
            .execute(
                "UPDATE response_cache SET updated_at = ?2 WHERE key = ?1",
                params![key, updated_at.timestamp()],
            )
            .unwrap();
    }
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, ApiError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| ApiError::Storage("cache encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, ApiError> {
    if sealed.len() < NONCE_LEN {
        return Err(ApiError::CacheCorruption(
            "stored payload shorter than nonce".into(),
        ));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| ApiError::CacheCorruption("payload failed authentication".into()))
}
