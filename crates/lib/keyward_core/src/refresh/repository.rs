//! Refresh-session persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::RefreshTokenRecord;
use crate::auth::AuthResult;

/// Fields of a session being created.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Revoke the device's active session, if any, and insert `token` in its
    /// place as one atomic step. Returns the new row and the number revoked.
    async fn replace_for_device(
        &self,
        token: &NewRefreshToken,
        reason: &str,
    ) -> AuthResult<(RefreshTokenRecord, u64)>;

    /// Any session (active, revoked or expired) with this hash.
    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenRecord>>;

    /// Swap the hash on a non-revoked row still holding `old_hash`.
    ///
    /// Returns false when another caller rotated or revoked it first.
    async fn rotate(
        &self,
        id: Uuid,
        old_hash: &str,
        new_hash: &str,
        used_at: DateTime<Utc>,
    ) -> AuthResult<bool>;

    /// Revoke the active session(s) of one device. Returns rows revoked.
    async fn revoke_for_device(&self, user_id: Uuid, device_id: &str, reason: &str)
    -> AuthResult<u64>;

    /// Revoke every active session of a user. Returns rows revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> AuthResult<u64>;

    /// Non-revoked sessions expiring after `now`, most recently used first.
    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AuthResult<Vec<RefreshTokenRecord>>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<u64>;

    async fn delete_revoked_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64>;
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    device_id: String,
    device_name: Option<String>,
    device_type: Option<String>,
    user_agent: Option<String>,
    ip_address: Option<String>,
    last_used_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            device_id: row.device_id,
            device_name: row.device_name,
            device_type: row.device_type,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
            last_used_at: row.last_used_at,
            expires_at: row.expires_at,
            is_revoked: row.is_revoked,
            revoked_at: row.revoked_at,
            revoked_reason: row.revoked_reason,
            created_at: row.created_at,
        }
    }
}

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, device_id, device_name, device_type, \
     user_agent, ip_address, last_used_at, expires_at, is_revoked, revoked_at, revoked_reason, \
     created_at";

/// PostgreSQL-backed [`RefreshTokenRepository`] over `refresh_tokens`.
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn replace_for_device(
        &self,
        token: &NewRefreshToken,
        reason: &str,
    ) -> AuthResult<(RefreshTokenRecord, u64)> {
        let mut tx = self.pool.begin().await?;

        // Serializes logins on the same device; the partial unique index on
        // active (user_id, device_id) backs this up.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text), hashtext($2::text))")
            .bind(token.user_id.to_string())
            .bind(&token.device_id)
            .execute(&mut *tx)
            .await?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true, revoked_at = now(), revoked_reason = $3 \
             WHERE user_id = $1 AND device_id = $2 AND NOT is_revoked",
        )
        .bind(token.user_id)
        .bind(&token.device_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let row = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            "INSERT INTO refresh_tokens \
             (id, user_id, token_hash, device_id, device_name, device_type, user_agent, \
              ip_address, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(&token.device_id)
        .bind(&token.device_name)
        .bind(&token.device_type)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .bind(token.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.into(), revoked))
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn rotate(
        &self,
        id: Uuid,
        old_hash: &str,
        new_hash: &str,
        used_at: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET token_hash = $3, last_used_at = $4 \
             WHERE id = $1 AND token_hash = $2 AND NOT is_revoked",
        )
        .bind(id)
        .bind(old_hash)
        .bind(new_hash)
        .bind(used_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_for_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        reason: &str,
    ) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true, revoked_at = now(), revoked_reason = $3 \
             WHERE user_id = $1 AND device_id = $2 AND NOT is_revoked",
        )
        .bind(user_id)
        .bind(device_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true, revoked_at = now(), revoked_reason = $2 \
             WHERE user_id = $1 AND NOT is_revoked",
        )
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AuthResult<Vec<RefreshTokenRecord>> {
        let rows = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens \
             WHERE user_id = $1 AND NOT is_revoked AND expires_at > $2 \
             ORDER BY COALESCE(last_used_at, created_at) DESC"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_revoked_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE is_revoked AND revoked_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
