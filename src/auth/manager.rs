use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::api::error::{normalize_error, ApiError};
use crate::auth::credentials::TokenStore;
use crate::models::auth::{RefreshRequest, UserCredentials};
use crate::models::{AuthResponse, TokenPair, UserInfo};
use crate::transport::Transport;

type RefreshFlight = Shared<BoxFuture<'static, Result<TokenPair, ApiError>>>;

/// Drives the token lifecycle against the remote API.
///
/// Concurrent `refresh` calls are coalesced: one network call is made and
/// every caller observes its result. Without this, simultaneous 401 repairs
/// would race to rotate the single refresh token.
pub struct AuthManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    base_url: String,
    inflight: Mutex<Option<RefreshFlight>>,
}

impl AuthManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inflight: Mutex::new(None),
        }
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<(), ApiError> {
        let body = UserCredentials {
            login: login.to_string(),
            password: password.to_string(),
        };
        let req = json_request(
            Method::POST,
            &format!("{}/register", self.base_url),
            &body,
        )?;
        let resp = self.transport.send(req).await?;
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(normalize_error(resp).await),
        }
    }

    /// Logs in and persists the returned pair. Nothing is stored on failure.
    pub async fn login(&self, login: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = UserCredentials {
            login: login.to_string(),
            password: password.to_string(),
        };
        let req = json_request(Method::POST, &format!("{}/auth", self.base_url), &body)?;
        let resp = self.transport.send(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(normalize_error(resp).await);
        }
        let pair: TokenPair = resp.json::<AuthResponse>().await?.into();
        self.store.save_tokens(&pair)?;
        Ok(pair)
    }

    /// Exchanges the stored refresh token for a new pair. Coalesced: callers
    /// arriving while a refresh is in flight await that flight's outcome.
    pub async fn refresh(&self) -> Result<TokenPair, ApiError> {
        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.as_ref() {
                Some(f) => f.clone(),
                None => {
                    let transport = Arc::clone(&self.transport);
                    let store = Arc::clone(&self.store);
                    let base_url = self.base_url.clone();
                    let f: RefreshFlight =
                        refresh_once(transport, store, base_url).boxed().shared();
                    *inflight = Some(f.clone());
                    f
                }
            }
        };

        let result = flight.clone().await;

        // Only the flight we awaited may be cleared; a newer one started
        // after resolution must stay installed.
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight.as_ref().map(|f| f.ptr_eq(&flight)).unwrap_or(false) {
            inflight.take();
        }
        result
    }

    /// Best-effort remote logout. Local state is cleared regardless of the
    /// remote call's outcome: the user's intent is to stop being logged in
    /// locally, connectivity or not.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(access) = self.store.current_access_token() {
            match bearer_request(Method::DELETE, &format!("{}/auth", self.base_url), &access) {
                Ok(req) => {
                    if let Err(err) = self.transport.send(req).await {
                        debug!(error = %err, "remote logout failed, clearing local session anyway");
                    }
                }
                Err(err) => {
                    debug!(error = %err, "could not build logout request, clearing local session anyway");
                }
            }
        }
        self.store.clear()
    }

    /// Checks the stored access token against the server. No network call is
    /// made when there is no local session.
    pub async fn verify(&self) -> Result<UserInfo, ApiError> {
        let access = self
            .store
            .current_access_token()
            .ok_or(ApiError::NotAuthenticated)?;
        let req = bearer_request(Method::GET, &format!("{}/auth-verify", self.base_url), &access)?;
        let resp = self.transport.send(req).await?;
        if resp.status() != StatusCode::NO_CONTENT {
            return Err(normalize_error(resp).await);
        }
        let user_id = resp
            .headers()
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("missing X-User-Id header".into()))?
            .to_string();
        Ok(UserInfo { user_id })
    }
}

/// The single underlying refresh call shared by all coalesced waiters.
async fn refresh_once(
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    base_url: String,
) -> Result<TokenPair, ApiError> {
    let tokens = store.load_tokens()?;
    if tokens.refresh_token.is_empty() {
        return Err(ApiError::NotAuthenticated);
    }
    let body = RefreshRequest {
        refresh_token: tokens.refresh_token,
    };
    let req = json_request(Method::PATCH, &format!("{base_url}/auth"), &body)?;
    let resp = transport.send(req).await?;
    if resp.status() != StatusCode::OK {
        return Err(normalize_error(resp).await);
    }
    let pair: TokenPair = resp.json::<AuthResponse>().await?.into();
    store.save_tokens(&pair)?;
    Ok(pair)
}

fn parse_url(url: &str) -> Result<Url, ApiError> {
    Url::parse(url).map_err(|e| ApiError::Validation(format!("invalid url {url}: {e}")))
}

fn json_request<B: Serialize>(method: Method, url: &str, body: &B) -> Result<Request, ApiError> {
    let mut req = Request::new(method, parse_url(url)?);
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let bytes = serde_json::to_vec(body)
        .map_err(|e| ApiError::Validation(format!("encode request body: {e}")))?;
    *req.body_mut() = Some(bytes.into());
    Ok(req)
}

fn bearer_request(method: Method, url: &str, token: &str) -> Result<Request, ApiError> {
    let mut req = Request::new(method, parse_url(url)?);
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ApiError::validation("access token contains invalid header characters"))?;
    value.set_sensitive(true);
    req.headers_mut().insert(AUTHORIZATION, value);
    Ok(req)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::credentials::MemoryTokenStore;
    use crate::transport::HttpTransport;

    fn manager_for(uri: String, store: Arc<MemoryTokenStore>) -> AuthManager {
        AuthManager::new(
            Arc::new(HttpTransport::new(reqwest::Client::new())),
            store,
            uri,
        )
    }

    fn seeded_store(access: &str, refresh: &str) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::default());
        store
            .save_tokens(&TokenPair {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                ..TokenPair::default()
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn login_persists_the_returned_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_json(json!({"login": "ann", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a1",
                "refresh_token": "r1",
                "token_type": "Bearer",
                "expires_in": 900
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::default());
        let mgr = manager_for(server.uri(), store.clone());
        let pair = mgr.login("ann", "pw").await.unwrap();
        assert_eq!(pair.access_token, "a1");
        assert_eq!(store.load_tokens().unwrap().refresh_token, "r1");
    }

    #[tokio::test]
    async fn login_failure_stores_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_raw(r#"{"message":"bad credentials"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::default());
        let mgr = manager_for(server.uri(), store.clone());
        let err = mgr.login("ann", "nope").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Remote {
                status: 401,
                message: "bad credentials".to_string()
            }
        );
        assert!(store.load_tokens().is_err());
    }

    #[tokio::test]
    async fn register_accepts_created_and_normalizes_conflicts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .and(body_json(json!({"login": "ann", "password": "pw"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mgr = manager_for(server.uri(), Arc::new(MemoryTokenStore::default()));
        mgr.register("ann", "pw").await.unwrap();

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        let err = mgr.register("ann", "pw").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Remote {
                status: 409,
                message: "Conflict".to_string()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce_into_one_call() {
        let server = MockServer::start().await;
        // Only the currently valid refresh token succeeds; a second network
        // call would carry the rotated token and fail the body matcher.
        Mock::given(method("PATCH"))
            .and(path("/auth"))
            .and(body_json(json!({"refresh_token": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(json!({
                        "access_token": "a2",
                        "refresh_token": "r2",
                        "token_type": "Bearer",
                        "expires_in": 900
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store("a1", "r1");
        let mgr = Arc::new(manager_for(server.uri(), store.clone()));

        let calls = (0..10).map(|_| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.refresh().await })
        });
        let results = join_all(calls).await;
        for res in results {
            let pair = res.unwrap().unwrap();
            assert_eq!(pair.access_token, "a2");
            assert_eq!(pair.refresh_token, "r2");
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(store.load_tokens().unwrap().refresh_token, "r2");
    }

    #[tokio::test]
    async fn a_refresh_after_resolution_makes_a_fresh_call() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "refresh_token": "r2"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = seeded_store("a1", "r1");
        let mgr = manager_for(server.uri(), store);
        mgr.refresh().await.unwrap();
        mgr.refresh().await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refresh_without_stored_tokens_is_not_found() {
        let server = MockServer::start().await;
        let mgr = manager_for(server.uri(), Arc::new(MemoryTokenStore::default()));
        assert!(matches!(
            mgr.refresh().await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_locally_even_when_the_server_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = seeded_store("a1", "r1");
        let mgr = manager_for(format!("http://{addr}"), store.clone());
        mgr.logout().await.unwrap();
        assert!(store.load_tokens().is_err());
    }

    #[tokio::test]
    async fn logout_sends_bearer_delete_and_clears() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/auth"))
            .and(header("authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store("a1", "r1");
        let mgr = manager_for(server.uri(), store.clone());
        mgr.logout().await.unwrap();
        assert!(store.load_tokens().is_err());
    }

    #[tokio::test]
    async fn verify_without_local_token_makes_no_network_call() {
        let server = MockServer::start().await;
        let mgr = manager_for(server.uri(), Arc::new(MemoryTokenStore::default()));
        assert_eq!(mgr.verify().await.unwrap_err(), ApiError::NotAuthenticated);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_reads_the_user_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth-verify"))
            .and(header("authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(204).insert_header("X-User-Id", "42"))
            .expect(1)
            .mount(&server)
            .await;

        let mgr = manager_for(server.uri(), seeded_store("a1", "r1"));
        let info = mgr.verify().await.unwrap();
        assert_eq!(info.user_id, "42");
    }

    #[tokio::test]
    async fn verify_normalizes_remote_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth-verify"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mgr = manager_for(server.uri(), seeded_store("a1", "r1"));
        assert!(matches!(
            mgr.verify().await.unwrap_err(),
            ApiError::Remote { status: 401, .. }
        ));
    }
}
