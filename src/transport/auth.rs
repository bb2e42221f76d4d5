use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use tracing::debug;

use super::Transport;
use crate::api::error::ApiError;
use crate::auth::credentials::TokenStore;
use crate::auth::manager::AuthManager;

/// Transport decorator that injects the stored bearer token and repairs a
/// 401 response with exactly one refresh-and-replay.
///
/// The replay copy is taken before the first send; a request whose body
/// cannot be reproduced byte-identical is never re-sent. A 401 on the replay
/// is returned as-is, so a broken refresh token cannot loop.
pub struct AuthTransport<T> {
    inner: T,
    manager: Arc<AuthManager>,
    store: Arc<dyn TokenStore>,
}

impl<T> AuthTransport<T> {
    pub fn new(inner: T, manager: Arc<AuthManager>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            inner,
            manager,
            store,
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for AuthTransport<T> {
    async fn send(&self, mut req: Request) -> Result<Response, ApiError> {
        if let Some(token) = self.store.current_access_token() {
            set_bearer(&mut req, &token)?;
        }

        // `try_clone` succeeds exactly when the body (if any) is buffered
        // bytes, which is the same condition under which a replay is legal.
        let replay = req.try_clone();

        let resp = self.inner.send(req).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        if !self.store.has_refresh_token() {
            debug!("401 without a stored refresh token, nothing to repair");
            return Ok(resp);
        }

        if let Err(err) = self.manager.refresh().await {
            debug!(error = %err, "token refresh failed, returning original 401");
            return Ok(resp);
        }

        let mut retry = match replay {
            Some(r) => r,
            None => {
                debug!("401 response for a request with an unreplayable body, not resending");
                return Ok(resp);
            }
        };
        if let Some(token) = self.store.current_access_token() {
            set_bearer(&mut retry, &token)?;
        }
        self.inner.send(retry).await
    }
}

fn set_bearer(req: &mut Request, token: &str) -> Result<(), ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ApiError::validation("access token contains invalid header characters"))?;
    value.set_sensitive(true);
    req.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
