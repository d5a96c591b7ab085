//! Email verification and password reset tokens.
//!
//! Each token maps to the email it was issued for and a logical expiry.
//! Entries are kept physically for [`EXPIRED_GRACE`] past that expiry so a
//! late redemption reports [`AuthError::TokenExpired`] rather than looking
//! like a token that never existed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{EphemeralStore, random_token};
use crate::auth::{AuthError, AuthResult};

/// How long an expired token stays recognisable.
pub const EXPIRED_GRACE: Duration = Duration::hours(1);

/// Bytes of entropy in a generated token.
const TOKEN_BYTES: usize = 32;

/// Token namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Verification,
    Reset,
}

impl TokenKind {
    fn prefix(self) -> &'static str {
        match self {
            TokenKind::Verification => "verify:",
            TokenKind::Reset => "reset:",
        }
    }

    /// Error reported for a token unknown in this namespace.
    fn invalid(self) -> AuthError {
        match self {
            TokenKind::Verification => AuthError::InvalidVerificationToken,
            TokenKind::Reset => AuthError::InvalidResetToken,
        }
    }
}

/// What a token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Single-use verification/reset token registry.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn EphemeralStore>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn EphemeralStore>) -> Self {
        Self { backend }
    }

    /// Generate a fresh token bound to `email` and store it.
    pub async fn issue(
        &self,
        kind: TokenKind,
        email: &str,
        ttl: Duration,
    ) -> AuthResult<(String, TokenData)> {
        let token = random_token(TOKEN_BYTES);
        let data = self.save(kind, &token, email, ttl).await?;
        Ok((token, data))
    }

    /// Store `token` for `email`, expiring after `ttl`.
    pub async fn save(
        &self,
        kind: TokenKind,
        token: &str,
        email: &str,
        ttl: Duration,
    ) -> AuthResult<TokenData> {
        let data = TokenData {
            email: email.to_string(),
            expires_at: Utc::now() + ttl,
        };
        let value = serde_json::to_string(&data)
            .map_err(|e| AuthError::Internal(format!("token encode: {e}")))?;
        let retain = (ttl + EXPIRED_GRACE)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        self.backend.put(&key(kind, token), value, retain).await?;
        Ok(data)
    }

    /// Look a token up without consuming it.
    pub async fn fetch(&self, kind: TokenKind, token: &str) -> AuthResult<TokenData> {
        let raw = self.backend.get(&key(kind, token)).await?;
        resolve(kind, raw)
    }

    /// Atomically remove a token and return what it mapped to.
    ///
    /// The token is gone afterwards whether or not it had expired.
    pub async fn consume(&self, kind: TokenKind, token: &str) -> AuthResult<TokenData> {
        let raw = self.backend.take(&key(kind, token)).await?;
        resolve(kind, raw)
    }

    pub async fn delete(&self, kind: TokenKind, token: &str) -> AuthResult<()> {
        self.backend.delete(&key(kind, token)).await
    }
}

fn key(kind: TokenKind, token: &str) -> String {
    format!("{}{token}", kind.prefix())
}

fn resolve(kind: TokenKind, raw: Option<String>) -> AuthResult<TokenData> {
    let raw = raw.ok_or_else(|| kind.invalid())?;
    let data: TokenData = serde_json::from_str(&raw).map_err(|_| kind.invalid())?;
    if Utc::now() >= data.expires_at {
        return Err(AuthError::TokenExpired);
    }
    Ok(data)
}
