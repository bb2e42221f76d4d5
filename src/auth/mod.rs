//! Token lifecycle: durable credential storage and the manager that drives
//! register/login/refresh/logout/verify against the API.

pub mod credentials;
pub mod manager;

pub use credentials::{open_store, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use manager::AuthManager;
