//! Authentication API client
//!
//! Talks to the remote login server. A successful login yields a bearer token
//! plus validity metadata; the token is what the session relays to the
//! scanner. Authentication failures are never retried automatically, and the
//! device-mismatch rejection is surfaced distinctly so the UI layer can tell
//! the user their account is bound to another device.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Login endpoint path
pub const API_LOGIN: &str = "/api/login";

/// Token verification endpoint path
pub const API_VERIFY_TOKEN: &str = "/api/verify_token";

/// Server error code for a device not registered to the account
pub const CODE_DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";

/// Errors surfaced by the authentication client
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Device not registered to this account: {0}")]
    DeviceMismatch(String),

    #[error("Login rejected: {0}")]
    Rejected(String),

    #[error("Token rejected: {0}")]
    InvalidToken(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
    pub device_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Login response body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub access_token: Option<String>,
    pub expires_at: Option<String>,
    pub user_info: Option<UserInfo>,
    /// Error code on failure, e.g. "DEVICE_MISMATCH"
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub expiry_date: Option<String>,
    pub is_active: bool,
}

/// A granted login: the bearer token plus its validity metadata
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub access_token: String,
    pub expires_at: Option<String>,
    pub expiry_date: Option<String>,
}

impl LoginGrant {
    /// Parse the token expiry timestamp, when the server supplied one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl LoginResponse {
    /// Convert the raw response into a grant or a classified failure
    pub fn into_grant(self) -> Result<LoginGrant, AuthError> {
        match (self.success, self.access_token) {
            (true, Some(access_token)) => Ok(LoginGrant {
                access_token,
                expires_at: self.expires_at,
                expiry_date: self.user_info.and_then(|u| u.expiry_date),
            }),
            _ => match self.code.as_deref() {
                Some(CODE_DEVICE_MISMATCH) => Err(AuthError::DeviceMismatch(self.message)),
                _ => Err(AuthError::Rejected(self.message)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct VerifyTokenRequest<'a> {
    access_token: &'a str,
    device_uuid: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct VerifyTokenResponse {
    success: bool,
    message: String,
    expires_at: Option<String>,
}

/// Client for the authentication server
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Authenticate an employee and obtain a bearer token
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, AuthError> {
        let url = format!("{}{}", self.base_url, API_LOGIN);
        debug!("POST {} (user: {})", url, request.user_id);

        let response: LoginResponse = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await?
            .json()
            .await?;

        debug!(
            "Login response: success={}, code={:?}",
            response.success, response.code
        );
        let grant = response.into_grant()?;
        info!("Login succeeded for user {}", request.user_id);
        Ok(grant)
    }

    /// Check whether a stored token is still accepted by the server
    pub async fn verify_token(
        &self,
        access_token: &str,
        device_uuid: &str,
    ) -> Result<Option<String>, AuthError> {
        let url = format!("{}{}", self.base_url, API_VERIFY_TOKEN);
        debug!("POST {}", url);

        let response: VerifyTokenResponse = self
            .client
            .post(&url)
            .json(&VerifyTokenRequest {
                access_token,
                device_uuid,
            })
            .send()
            .await?
            .json()
            .await?;

        if response.success {
            Ok(response.expires_at)
        } else {
            Err(AuthError::InvalidToken(response.message))
        }
    }
}
