use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::ApiClient;
use crate::cache::CacheStore;
use crate::models::{Item, ItemCreate, ItemList, ItemSummary, ItemUpdate, ListParams};

const LIST_PREFIX: &str = "items:list:";

/// Read-through item access: serve live, remember the payload, and fall back
/// to the last known good copy only when the network itself failed.
///
/// Authoritative server answers (any completed HTTP status) are never masked
/// by cached data.
pub struct ItemService {
    api: Arc<ApiClient>,
    cache: Option<Arc<CacheStore>>,
}

impl ItemService {
    /// `cache: None` disables caching entirely.
    pub fn new(api: Arc<ApiClient>, cache: Option<Arc<CacheStore>>) -> Self {
        Self { api, cache }
    }

    pub async fn list(&self, params: &ListParams) -> Result<ItemList, ApiError> {
        let key = list_key(params);
        match self.api.list_items(params).await {
            Ok(bytes) => {
                self.remember(&key, &bytes);
                decode(&bytes)
            }
            Err(err) => {
                let bytes = self.fallback(&key, err)?;
                decode(&bytes)
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Item, ApiError> {
        let key = get_key(id);
        match self.api.get_item(id).await {
            Ok(bytes) => {
                self.remember(&key, &bytes);
                decode(&bytes)
            }
            Err(err) => {
                let bytes = self.fallback(&key, err)?;
                decode(&bytes)
            }
        }
    }

    pub async fn create(&self, body: &ItemCreate) -> Result<ItemSummary, ApiError> {
        let summary = self.api.create_item(body).await?;
        self.invalidate(None);
        Ok(summary)
    }

    pub async fn update(&self, id: Uuid, body: &ItemUpdate) -> Result<ItemSummary, ApiError> {
        let summary = self.api.update_item(id, body).await?;
        self.invalidate(Some(id));
        Ok(summary)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        self.api.delete_item(id).await?;
        self.invalidate(Some(id));
        Ok(())
    }

    /// Fire-and-forget cache write. A failed write never fails the read.
    fn remember(&self, key: &str, bytes: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(key, bytes, "") {
                warn!(key, error = %err, "cache write failed");
            }
        }
    }

    /// Consults the cache after a failed live call. Only network-level
    /// failures are eligible; corruption is surfaced, a plain miss or a stale
    /// entry re-raises the original error.
    fn fallback(&self, key: &str, err: ApiError) -> Result<Vec<u8>, ApiError> {
        let Some(cache) = &self.cache else {
            return Err(err);
        };
        if !err.is_network() {
            return Err(err);
        }
        match cache.get(key) {
            Ok(entry) if cache.is_fresh(entry.updated_at) => {
                debug!(key, "serving cached payload after network failure");
                Ok(entry.payload)
            }
            Ok(_) => Err(err),
            Err(corruption @ ApiError::CacheCorruption(_)) => Err(corruption),
            Err(_) => Err(err),
        }
    }

    fn invalidate(&self, id: Option<Uuid>) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(err) = cache.delete_prefix(LIST_PREFIX) {
            warn!(error = %err, "list cache invalidation failed");
        }
        if let Some(id) = id {
            if let Err(err) = cache.delete(&get_key(id)) {
                warn!(%id, error = %err, "item cache invalidation failed");
            }
        }
    }
}

/// Deterministic list key with defaults rendered literally, so calls that
/// spell out a default collide with calls that omit it. An explicit limit of
/// zero is indistinguishable from an unset one; kept as observed behavior.
fn list_key(params: &ListParams) -> String {
    format!(
        "{LIST_PREFIX}type={};s={};limit={};offset={}",
        params.item_type.as_deref().unwrap_or(""),
        params.search.as_deref().unwrap_or(""),
        params.limit.unwrap_or(0),
        params.offset.unwrap_or(0),
    )
}

fn get_key(id: Uuid) -> String {
    format!("items:get:{id}")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::InvalidResponse(format!("decode response body: {e}")))
}
