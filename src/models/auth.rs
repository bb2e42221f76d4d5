use serde::{Deserialize, Serialize};

/// The access/refresh pair held by the credential store.
///
/// Invariant: both tokens are non-empty or the pair is not stored at all;
/// the store rejects partial sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
}

/// Body of `POST /auth` and `PATCH /auth` responses. Every field is optional
/// on the wire; missing fields decay to empty values.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

impl From<AuthResponse> for TokenPair {
    fn from(r: AuthResponse) -> Self {
        TokenPair {
            access_token: r.access_token.unwrap_or_default(),
            refresh_token: r.refresh_token.unwrap_or_default(),
            token_type: r.token_type.unwrap_or_default(),
            expires_in: r.expires_in.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCredentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
}

/// Error body convention: `{code, error, message}`, all optional.
/// Only `message` feeds user-facing text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    pub code: Option<i64>,
    pub error: Option<String>,
    pub message: Option<String>,
}
