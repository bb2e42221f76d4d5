//! Encrypted fallback cache for read responses.
//!
//! SQLite does not encrypt; payloads are sealed application-side with
//! XChaCha20-Poly1305 before they hit disk. The symmetric key lives in the
//! platform keyring and is fetched for every seal/open, never written
//! anywhere else.

pub mod keys;
pub mod store;

pub use keys::{KeyProvider, KeyringKeyProvider, StaticKeyProvider};
pub use store::{CacheEntry, CacheStore};
