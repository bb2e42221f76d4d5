//! Domain services composed over the API client: read-through caching for
//! items and the presign/upload/download flow for files.

pub mod files;
pub mod items;

pub use files::FileService;
pub use items::ItemService;
