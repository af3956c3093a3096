//! Caller identity.
//!
//! Every credit-bearing route takes a `VerifiedAccount`, which is only ever built from a
//! bearer ID token checked by the configured `IdentityVerifier`. Account ids never come
//! from request bodies.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::state::AppState;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidToken(reason) => {
                debug!("Rejected bearer token: {reason}");
                AppError::Unauthorized
            }
            IdentityError::Unavailable(e) => {
                AppError::Internal(anyhow::anyhow!("Identity provider unavailable: {e}"))
            }
        }
    }
}

/// Turns a bearer token into a verified account id (a lower-cased email).
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, IdentityError>;
}

/// Verifies Google ID tokens against the token-info endpoint.
pub struct GoogleIdentityVerifier {
    client: Client,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    email: Option<String>,
    /// Google returns this as the string "true" or "false".
    email_verified: Option<String>,
}

impl GoogleIdentityVerifier {
    pub fn new(client_id: String) -> Result<Self, IdentityError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            client_id,
        })
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<String, IdentityError> {
        let response = self
            .client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", token)])
            .send()
            .await?;

        if response.status().is_client_error() {
            return Err(IdentityError::InvalidToken(format!(
                "token-info returned {}",
                response.status()
            )));
        }
        let info: TokenInfo = response.error_for_status()?.json().await?;
        check_token_info(info, &self.client_id)
    }
}

fn check_token_info(info: TokenInfo, client_id: &str) -> Result<String, IdentityError> {
    if info.aud != client_id {
        warn!("ID token issued for another audience: {}", info.aud);
        return Err(IdentityError::InvalidToken("audience mismatch".to_string()));
    }
    if info.email_verified.as_deref() != Some("true") {
        return Err(IdentityError::InvalidToken("email not verified".to_string()));
    }
    let email = info
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| IdentityError::InvalidToken("token carries no email".to_string()))?;
    Ok(email.trim().to_lowercase())
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller's account id.
#[derive(Debug, Clone)]
pub struct VerifiedAccount(pub String);

#[async_trait]
impl FromRequestParts<AppState> for VerifiedAccount {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AppError::Unauthorized)?;

        let account_id = state.identity.verify(token).await?;
        Ok(VerifiedAccount(account_id))
    }
}
