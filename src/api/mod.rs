//! Typed endpoint surface and the error taxonomy it speaks.

pub mod client;
pub mod error;

pub use client::{connect, ApiClient, ClientStack};
pub use error::ApiError;
