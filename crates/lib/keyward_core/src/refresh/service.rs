//! Issue, rotate, list and revoke refresh sessions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::repository::{NewRefreshToken, RefreshTokenRepository};
use super::{DeviceInfo, DeviceSession, REASON_LOGOUT, REASON_SUPERSEDED, hash_token};
use crate::auth::jwt::AccessToken;
use crate::auth::{AuthError, AuthResult, AuthService};
use crate::config::RefreshConfig;

/// A newly issued refresh secret. The raw value is never available again.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedRefreshToken {
    pub refresh_token: String,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshedSession {
    pub access_token: AccessToken,
    /// Replaces the secret that was presented.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Generate a random refresh secret (64 alphanumeric chars).
fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub struct RefreshTokenService {
    repo: Arc<dyn RefreshTokenRepository>,
    auth: Arc<AuthService>,
    config: RefreshConfig,
}

impl RefreshTokenService {
    /// Lifetimes come from the auth service's configuration.
    pub fn new(repo: Arc<dyn RefreshTokenRepository>, auth: Arc<AuthService>) -> Self {
        let config = auth.config().refresh.clone();
        Self { repo, auth, config }
    }

    fn lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.config.remember_me_ttl
        } else {
            self.config.default_ttl
        }
    }

    /// Open a session for `device`, replacing any active one on the same device.
    pub async fn create_refresh_token(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
        remember_me: bool,
    ) -> AuthResult<IssuedRefreshToken> {
        let device_id = device.resolved_device_id();

        let refresh_token = generate_token();
        let (record, superseded) = self
            .repo
            .replace_for_device(
                &NewRefreshToken {
                    user_id,
                    token_hash: hash_token(&refresh_token),
                    device_id,
                    device_name: device.device_name.clone(),
                    device_type: device.device_type.clone(),
                    user_agent: device.user_agent.clone(),
                    ip_address: device.ip_address.clone(),
                    expires_at: Utc::now() + self.lifetime(remember_me),
                },
                REASON_SUPERSEDED,
            )
            .await?;
        if superseded > 0 {
            debug!(user_id = %user_id, device_id = %record.device_id, superseded, "previous device session superseded");
        }

        info!(
            user_id = %user_id,
            session_id = %record.id,
            device_id = %record.device_id,
            remember_me,
            "refresh session created"
        );
        Ok(IssuedRefreshToken {
            refresh_token,
            device_id: record.device_id,
            expires_at: record.expires_at,
        })
    }

    /// Trade a refresh secret for a new access token and a new secret.
    ///
    /// The session keeps its original expiry. The presented secret stops
    /// working as soon as this returns successfully.
    pub async fn refresh_access_token(
        &self,
        raw_token: &str,
        user_id: Uuid,
    ) -> AuthResult<RefreshedSession> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Err(AuthError::RefreshTokenNotFound);
        }

        let old_hash = hash_token(raw_token);
        let record = self
            .repo
            .find_by_hash(&old_hash)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or(AuthError::RefreshTokenNotFound)?;

        let now = Utc::now();
        if record.is_expired_at(now) {
            return Err(AuthError::RefreshTokenExpired);
        }
        if record.is_revoked {
            warn!(
                user_id = %user_id,
                session_id = %record.id,
                reason = record.revoked_reason.as_deref().unwrap_or_default(),
                "revoked refresh token presented"
            );
            return Err(AuthError::RefreshTokenRevoked);
        }

        let access_token = self.auth.refresh_token(user_id).await?;

        let refresh_token = generate_token();
        if !self
            .repo
            .rotate(record.id, &old_hash, &hash_token(&refresh_token), now)
            .await?
        {
            // Lost a race with a concurrent rotation or revocation.
            return Err(AuthError::RefreshTokenNotFound);
        }

        debug!(user_id = %user_id, session_id = %record.id, "refresh token rotated");
        Ok(RefreshedSession {
            access_token,
            refresh_token,
            expires_at: record.expires_at,
        })
    }

    /// Active sessions of a user, for display.
    pub async fn get_user_devices(&self, user_id: Uuid) -> AuthResult<Vec<DeviceSession>> {
        let records = self.repo.list_active_for_user(user_id, Utc::now()).await?;
        Ok(records.into_iter().map(DeviceSession::from).collect())
    }

    /// Log one device out.
    pub async fn revoke_device_token(
        &self,
        user_id: Uuid,
        device_id: &str,
        reason: Option<&str>,
    ) -> AuthResult<()> {
        let reason = reason.unwrap_or(REASON_LOGOUT);
        let revoked = self.repo.revoke_for_device(user_id, device_id, reason).await?;
        if revoked == 0 {
            return Err(AuthError::RefreshTokenNotFound);
        }
        info!(user_id = %user_id, device_id, reason, "device session revoked");
        Ok(())
    }

    /// Log out everywhere. Returns the number of sessions revoked.
    pub async fn revoke_all_user_tokens(&self, user_id: Uuid, reason: Option<&str>) -> AuthResult<u64> {
        let reason = reason.unwrap_or(REASON_LOGOUT);
        let revoked = self.repo.revoke_all_for_user(user_id, reason).await?;
        info!(user_id = %user_id, revoked, reason, "all sessions revoked");
        Ok(revoked)
    }

    /// Retention: drop sessions past their expiry.
    pub async fn delete_expired(&self) -> AuthResult<u64> {
        let deleted = self.repo.delete_expired(Utc::now()).await?;
        info!(deleted, "expired refresh sessions deleted");
        Ok(deleted)
    }

    /// Retention: drop sessions revoked more than `older_than` ago.
    pub async fn delete_revoked(&self, older_than: Duration) -> AuthResult<u64> {
        let deleted = self
            .repo
            .delete_revoked_before(Utc::now() - older_than)
            .await?;
        info!(deleted, older_than_days = older_than.num_days(), "revoked refresh sessions deleted");
        Ok(deleted)
    }
}
