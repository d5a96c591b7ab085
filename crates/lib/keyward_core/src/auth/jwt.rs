//! JWT access token generation and verification.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuthError, AuthResult};

/// Default access token lifetime: 24 hours.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, same value as `user_id`.
    pub sub: String,
    pub user_id: Uuid,
    pub email: String,
    pub user_type: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Wire shape used when decoding, so absent claims surface as
/// [`AuthError::MissingClaim`] instead of a generic decode failure.
#[derive(Debug, Deserialize)]
struct RawClaims {
    user_id: Option<String>,
    email: Option<String>,
    user_type: Option<String>,
    #[serde(default)]
    iat: i64,
    exp: i64,
}

/// A freshly signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry at the moment of issue.
    pub expires_in: i64,
}

/// Signs and verifies HS256 access tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Configured token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for the given subject, valid for the configured lifetime.
    pub fn issue(&self, user_id: Uuid, email: &str, user_type: &str) -> AuthResult<AccessToken> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            user_id,
            email: email.to_string(),
            user_type: user_type.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.sign(&claims)?;
        Ok(AccessToken {
            token,
            token_type: "Bearer",
            expires_at,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// Sign an arbitrary claim set.
    pub fn sign(&self, claims: &Claims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry, then extract the required claims.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<RawClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::AccessTokenExpired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        let raw = data.claims;

        let user_id = required(raw.user_id, "user_id")?;
        let email = required(raw.email, "email")?;
        let user_type = required(raw.user_type, "user_type")?;
        let user_id = Uuid::parse_str(&user_id)
            .map_err(|_| AuthError::InvalidToken("user_id is not a UUID".into()))?;

        Ok(Claims {
            sub: user_id.to_string(),
            user_id,
            email,
            user_type,
            iat: raw.iat,
            exp: raw.exp,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> AuthResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingClaim(name))
}

/// Generate a random 64-character alphanumeric signing secret.
pub fn generate_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Resolve the JWT secret: env var `JWT_SECRET`, then `AUTH_SECRET`, then the persisted file.
pub fn resolve_jwt_secret() -> String {
    ["JWT_SECRET", "AUTH_SECRET"]
        .into_iter()
        .find_map(|name| std::env::var(name).ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| load_or_create_secret(&jwt_secret_path()))
}

/// Read the secret stored at `path`, or generate one and try to store it.
///
/// A secret that cannot be stored is still returned, but the next process
/// will generate a different one and every token issued now stops verifying.
fn load_or_create_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let secret = generate_secret();
    let persisted = match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
    .and_then(|()| std::fs::write(path, &secret));
    match persisted {
        Ok(()) => info!(path = %path.display(), "generated new JWT secret"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "generated JWT secret could not be saved; tokens will not survive a restart"
        ),
    }
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyward")
        .join("jwt-secret")
}
