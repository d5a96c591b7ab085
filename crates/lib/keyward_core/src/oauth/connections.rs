//! Stored links between a local account and a provider identity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthResult;

/// One row per (user, provider).
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    /// Userinfo snapshot from the latest login.
    pub profile: serde_json::Value,
    /// AES-GCM ciphertext, see [`crate::secrets`].
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a client sees about a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedProvider {
    pub provider: String,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl From<&OAuthConnection> for ConnectedProvider {
    fn from(conn: &OAuthConnection) -> Self {
        Self {
            provider: conn.provider.clone(),
            provider_user_id: conn.provider_user_id.clone(),
            email: conn
                .profile
                .get("email")
                .and_then(|v| v.as_str())
                .map(String::from),
            connected_at: conn.created_at,
        }
    }
}

/// Fields written on every successful provider login.
#[derive(Debug, Clone)]
pub struct ConnectionUpsert {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub profile: serde_json::Value,
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Active connection for a provider identity.
    async fn find_by_provider_user(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<OAuthConnection>>;

    /// Insert, or refresh and reactivate the existing (user, provider) row.
    /// A `None` refresh token keeps the stored one.
    async fn upsert(&self, conn: &ConnectionUpsert) -> AuthResult<OAuthConnection>;

    /// Active connections of a user.
    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<OAuthConnection>>;

    /// Mark the (user, provider) connection inactive and drop its tokens.
    /// Returns false when there was no active connection.
    async fn deactivate(&self, user_id: Uuid, provider: &str) -> AuthResult<bool>;
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    provider_user_id: String,
    profile: serde_json::Value,
    access_token_enc: Option<String>,
    refresh_token_enc: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectionRow> for OAuthConnection {
    fn from(row: ConnectionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            provider_user_id: row.provider_user_id,
            profile: row.profile,
            access_token_enc: row.access_token_enc,
            refresh_token_enc: row.refresh_token_enc,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const CONNECTION_COLUMNS: &str = "id, user_id, provider, provider_user_id, profile, \
     access_token_enc, refresh_token_enc, is_active, created_at, updated_at";

/// PostgreSQL-backed [`ConnectionRepository`] over `oauth_connections`.
#[derive(Clone)]
pub struct PgConnectionRepository {
    pool: PgPool,
}

impl PgConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn find_by_provider_user(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<OAuthConnection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM oauth_connections \
             WHERE provider = $1 AND provider_user_id = $2 AND is_active"
        ))
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert(&self, conn: &ConnectionUpsert) -> AuthResult<OAuthConnection> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "INSERT INTO oauth_connections \
             (id, user_id, provider, provider_user_id, profile, access_token_enc, refresh_token_enc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, provider) DO UPDATE SET \
               provider_user_id = EXCLUDED.provider_user_id, \
               profile = EXCLUDED.profile, \
               access_token_enc = EXCLUDED.access_token_enc, \
               refresh_token_enc = COALESCE(EXCLUDED.refresh_token_enc, oauth_connections.refresh_token_enc), \
               is_active = true, \
               updated_at = now() \
             RETURNING {CONNECTION_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(conn.user_id)
        .bind(&conn.provider)
        .bind(&conn.provider_user_id)
        .bind(&conn.profile)
        .bind(&conn.access_token_enc)
        .bind(&conn.refresh_token_enc)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<OAuthConnection>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM oauth_connections \
             WHERE user_id = $1 AND is_active ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn deactivate(&self, user_id: Uuid, provider: &str) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE oauth_connections SET is_active = false, access_token_enc = NULL, \
             refresh_token_enc = NULL, updated_at = now() \
             WHERE user_id = $1 AND provider = $2 AND is_active",
        )
        .bind(user_id)
        .bind(provider)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
