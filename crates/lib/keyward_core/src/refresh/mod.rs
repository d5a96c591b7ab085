//! Device-bound refresh sessions.
//!
//! A refresh token is a random secret handed to the client once; only its
//! SHA-256 is stored. Each (user, device) pair has at most one active
//! session. Issuing a new one for the same device revokes the old one with
//! reason [`REASON_SUPERSEDED`].

pub mod repository;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use repository::{NewRefreshToken, PgRefreshTokenRepository, RefreshTokenRepository};
pub use service::{IssuedRefreshToken, RefreshTokenService, RefreshedSession};

/// Revocation reason recorded when a device logs in again.
pub const REASON_SUPERSEDED: &str = "superseded";
/// Revocation reason used when the caller gives none.
pub const REASON_LOGOUT: &str = "logout";

/// Client-reported device metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    /// e.g. `ios`, `android`, `web`.
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl DeviceInfo {
    /// The client's device id, else one derived from user agent and IP so
    /// repeat logins from the same client replace each other. Without either,
    /// a fresh id is generated.
    pub fn resolved_device_id(&self) -> String {
        if let Some(id) = self.device_id.as_deref().map(str::trim)
            && !id.is_empty()
        {
            return id.to_string();
        }

        let ua = self.user_agent.as_deref().unwrap_or_default();
        let ip = self.ip_address.as_deref().unwrap_or_default();
        if ua.is_empty() && ip.is_empty() {
            return Uuid::new_v4().to_string();
        }
        let digest = Sha256::digest(format!("{ua}|{ip}").as_bytes());
        format!("derived-{}", &format!("{digest:x}")[..32])
    }
}

/// A stored refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 hex of the secret.
    pub token_hash: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Session as listed to its owner. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSession {
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<RefreshTokenRecord> for DeviceSession {
    fn from(r: RefreshTokenRecord) -> Self {
        Self {
            device_id: r.device_id,
            device_name: r.device_name,
            device_type: r.device_type,
            user_agent: r.user_agent,
            ip_address: r.ip_address,
            last_used_at: r.last_used_at,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }
    }
}

/// SHA-256 hash a refresh secret for storage and lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
