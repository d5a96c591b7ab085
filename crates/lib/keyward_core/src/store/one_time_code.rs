//! One-time codes that stand in for an access token during a deep-link
//! handoff from a browser redirect to a native client.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{EphemeralStore, fingerprint, random_token};
use crate::auth::{AuthError, AuthResult};

/// Upper bound on a code's lifetime.
pub const MAX_CODE_TTL: Duration = Duration::from_secs(300);

/// Default code lifetime.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(120);

const CODE_BYTES: usize = 32;

/// Single-use code → access token registry.
#[derive(Clone)]
pub struct OneTimeCodeStore {
    backend: Arc<dyn EphemeralStore>,
}

impl OneTimeCodeStore {
    pub fn new(backend: Arc<dyn EphemeralStore>) -> Self {
        Self { backend }
    }

    /// Wrap `access_token` in a new code valid for `ttl` (at most
    /// [`MAX_CODE_TTL`]).
    pub async fn create(&self, access_token: &str, ttl: Duration) -> AuthResult<String> {
        let code = random_token(CODE_BYTES);
        let ttl = ttl.min(MAX_CODE_TTL);
        self.backend
            .put(&key(&code), access_token.to_string(), ttl)
            .await?;
        debug!(code = %fingerprint(&code), ttl_secs = ttl.as_secs(), "one-time code created");
        Ok(code)
    }

    /// Redeem a code. The code is deleted before anything else happens, so a
    /// second redemption fails even if the caller's next step does.
    pub async fn consume(&self, code: &str) -> AuthResult<String> {
        if code.is_empty() {
            return Err(AuthError::OneTimeCodeInvalid);
        }
        self.backend
            .take(&key(code))
            .await?
            .ok_or(AuthError::OneTimeCodeInvalid)
    }
}

fn key(code: &str) -> String {
    format!("otc:{code}")
}
