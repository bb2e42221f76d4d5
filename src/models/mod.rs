//! Wire types for the StashKeep REST API.
//!
//! These structs stand in for a generated REST binding: request and response
//! bodies are plain serde types, decoded leniently (optional fields) the way
//! the server actually emits them.

pub mod auth;
pub mod file;
pub mod item;

pub use auth::{AuthResponse, ErrorBody, TokenPair, UserInfo};
pub use file::{PresignRequest, PresignResponse};
pub use item::{Item, ItemCreate, ItemData, ItemList, ItemSummary, ItemUpdate, ListParams};
