//! Pending OAuth authorization requests, keyed by the `state` parameter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EphemeralStore;
use crate::auth::{AuthError, AuthResult};
use crate::oauth::ClientType;
use crate::oauth::pkce::ChallengeMethod;

/// Default lifetime of a pending authorization request (10 minutes).
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Context recorded when the authorization URL is handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateData {
    pub client_type: ClientType,
    /// Redirect URI the client declared.
    pub redirect_uri: Option<String>,
    /// Deep link the callback sends a native client back to.
    pub post_login_redirect: Option<String>,
    /// Client-supplied challenge, enforced when the client exchanges the code.
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<ChallengeMethod>,
    /// Server-held verifier for the leg between this service and the provider.
    pub provider_code_verifier: String,
    pub created_at: DateTime<Utc>,
}

/// In-flight OAuth state registry. A state is consumed exactly once.
#[derive(Clone)]
pub struct OAuthStateStore {
    backend: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(backend: Arc<dyn EphemeralStore>) -> Self {
        Self::with_ttl(backend, DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(backend: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a pending state entry.
    pub async fn save(&self, state: &str, data: &OAuthStateData) -> AuthResult<()> {
        let value = serde_json::to_string(data)
            .map_err(|e| AuthError::Internal(format!("oauth state encode: {e}")))?;
        self.backend.put(&key(state), value, self.ttl).await
    }

    /// Take (remove and return) a pending state entry.
    ///
    /// Unknown, expired and already-consumed states all fail the same way.
    pub async fn consume(&self, state: &str) -> AuthResult<OAuthStateData> {
        if state.is_empty() {
            return Err(AuthError::OAuthStateInvalid);
        }
        let raw = self
            .backend
            .take(&key(state))
            .await?
            .ok_or(AuthError::OAuthStateInvalid)?;
        serde_json::from_str(&raw).map_err(|_| AuthError::OAuthStateInvalid)
    }
}

fn key(state: &str) -> String {
    format!("oauth-state:{state}")
}
