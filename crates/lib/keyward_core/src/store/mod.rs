//! Short-lived, single-use key/value storage.
//!
//! Verification and reset tokens, OAuth state and one-time codes all live in
//! an [`EphemeralStore`]. Two backends implement it: [`MemoryStore`] for a
//! single process and [`RedisStore`] for deployments with several instances.
//!
//! Every backend must make [`EphemeralStore::take`] atomic: when two callers
//! race to take the same key, at most one of them gets the value.

pub mod memory;
pub mod oauth_state;
pub mod one_time_code;
pub mod redis_store;
pub mod tokens;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::auth::AuthResult;
use crate::config::StoreBackend;

pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryStore};
pub use oauth_state::{OAuthStateData, OAuthStateStore};
pub use one_time_code::OneTimeCodeStore;
pub use redis_store::RedisStore;
pub use tokens::{TokenData, TokenKind, TokenStore};

/// TTL-bounded key/value store with atomic read-and-delete.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Insert or replace `key`. The entry disappears after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> AuthResult<()>;

    /// Read without consuming. Expired entries read as absent.
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Remove and return the value in one atomic step.
    async fn take(&self, key: &str) -> AuthResult<Option<String>>;

    async fn delete(&self, key: &str) -> AuthResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Build the configured backend. The in-process backend comes with its
/// expiry sweep running every [`DEFAULT_SWEEP_INTERVAL`].
pub async fn connect(backend: &StoreBackend) -> AuthResult<Arc<dyn EphemeralStore>> {
    match backend {
        StoreBackend::Memory => Ok(MemoryStore::with_sweeper(DEFAULT_SWEEP_INTERVAL)),
        StoreBackend::Redis { url } => Ok(Arc::new(RedisStore::connect(url).await?)),
    }
}

/// URL-safe random token from `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Short, non-reversible fingerprint of a secret for log correlation.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("{digest:x}")[..12].to_string()
}
