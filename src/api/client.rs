use std::sync::Arc;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request, Response, Url};
use serde::Serialize;
use uuid::Uuid;

use super::error::{normalize_error, ApiError};
use crate::auth::{AuthManager, TokenStore};
use crate::config::Config;
use crate::models::{ItemCreate, ItemSummary, ItemUpdate, ListParams, PresignRequest, PresignResponse};
use crate::transport::{
    build_http_client, AuthTransport, HttpTransport, RetryPolicy, RetryTransport, Transport,
};

/// Typed endpoint methods over an arbitrary transport stack.
///
/// Read endpoints return the raw response bytes so callers can cache the
/// exact payload; mutation endpoints decode their responses in place.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_items(&self, params: &ListParams) -> Result<Vec<u8>, ApiError> {
        let mut url = self.url("items")?;
        {
            let mut q = url.query_pairs_mut();
            if let Some(t) = &params.item_type {
                q.append_pair("type", t);
            }
            if let Some(s) = &params.search {
                q.append_pair("s", s);
            }
            if let Some(limit) = params.limit {
                q.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = params.offset {
                q.append_pair("offset", &offset.to_string());
            }
        }
        let resp = self.execute(Request::new(Method::GET, url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn get_item(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&format!("items/{id}"))?;
        let resp = self.execute(Request::new(Method::GET, url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn create_item(&self, body: &ItemCreate) -> Result<ItemSummary, ApiError> {
        let req = self.json_request(Method::POST, "items", body)?;
        let resp = self.execute(req).await?;
        Ok(resp.json().await?)
    }

    pub async fn update_item(&self, id: Uuid, body: &ItemUpdate) -> Result<ItemSummary, ApiError> {
        let req = self.json_request(Method::PUT, &format!("items/{id}"), body)?;
        let resp = self.execute(req).await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_item(&self, id: Uuid) -> Result<(), ApiError> {
        let url = self.url(&format!("items/{id}"))?;
        self.execute(Request::new(Method::DELETE, url)).await?;
        Ok(())
    }

    pub async fn presign_file(&self, body: &PresignRequest) -> Result<PresignResponse, ApiError> {
        let req = self.json_request(Method::POST, "files/presign", body)?;
        let resp = self.execute(req).await?;
        Ok(resp.json().await?)
    }

    pub async fn download_file(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&format!("files/{id}"))?;
        let resp = self.execute(Request::new(Method::GET, url)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn execute(&self, req: Request) -> Result<Response, ApiError> {
        let resp = self.transport.send(req).await?;
        if !resp.status().is_success() {
            return Err(normalize_error(resp).await);
        }
        Ok(resp)
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let full = format!("{}/{path}", self.base_url);
        Url::parse(&full).map_err(|e| ApiError::Validation(format!("invalid url {full}: {e}")))
    }

    fn json_request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Request, ApiError> {
        let mut req = Request::new(method, self.url(path)?);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::Validation(format!("encode request body: {e}")))?;
        *req.body_mut() = Some(bytes.into());
        Ok(req)
    }
}

/// The fully wired client: typed endpoints over the retrying, auth-repairing
/// transport, plus the pieces the CLI needs on the side.
pub struct ClientStack {
    pub api: ApiClient,
    pub auth: Arc<AuthManager>,
    /// Bare client for presigned uploads, which bypass both retry and auth.
    pub http: reqwest::Client,
}

/// Assembles the transport stack. The data path is
/// retry(reads) → auth repair → network; the token manager gets its own
/// retry(transient) → network path so a refresh is never auth-decorated.
pub fn connect(cfg: &Config, store: Arc<dyn TokenStore>) -> Result<ClientStack, ApiError> {
    let http = build_http_client(cfg)?;
    let base = HttpTransport::new(http.clone());

    let manager_transport =
        RetryTransport::new(base.clone(), RetryPolicy::transient(&cfg.retry));
    let auth = Arc::new(AuthManager::new(
        Arc::new(manager_transport),
        store.clone(),
        cfg.server.base_url.clone(),
    ));

    let data_path = RetryTransport::new(
        AuthTransport::new(base, auth.clone(), store),
        RetryPolicy::reads(&cfg.retry),
    );
    let api = ApiClient::new(Arc::new(data_path), cfg.server.base_url.clone());

    Ok(ClientStack { api, auth, http })
}
