//! Credential records.
//!
//! The user row belongs to the wider account domain. This crate reads it,
//! creates it at registration or first OAuth login, and flips only the
//! verification flag, status, password hash and last-login timestamp.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{AuthError, AuthResult};

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Registered but not yet verified.
    Inactive,
    Suspended,
    /// Closed by the user or an operator.
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "suspended" => Ok(AccountStatus::Suspended),
            "deactivated" => Ok(AccountStatus::Deactivated),
            other => Err(AuthError::Internal(format!("unknown account status: {other}"))),
        }
    }
}

/// The subset of the user entity authentication works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    /// `None` for accounts created through a third-party login.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub status: AccountStatus,
    /// Carried into access-token claims.
    pub user_type: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Fields supplied when creating a credential record.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub status: AccountStatus,
    pub user_type: String,
}

/// Trim and lower-case an email address for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Credential-record persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>>;

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<UserRecord>>;

    async fn create(&self, user: &NewUser) -> AuthResult<UserRecord>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()>;

    /// Set `is_verified` and promote `inactive` to `active`. Any other status
    /// is left alone. Returns `None` when the record was already verified.
    async fn mark_verified(&self, id: Uuid) -> AuthResult<Option<UserRecord>>;

    /// Like [`Self::mark_verified`], but also drops the password hash. Used
    /// when a provider vouches for an email that was registered and never
    /// confirmed, so whoever chose that password cannot sign in.
    async fn claim_unverified(&self, id: Uuid) -> AuthResult<Option<UserRecord>>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    password_hash: Option<String>,
    is_verified: bool,
    status: String,
    user_type: String,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserRecord {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            is_verified: row.is_verified,
            status: row.status.parse()?,
            user_type: row.user_type,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, email, name, password_hash, is_verified, status, user_type, \
     last_login, created_at, updated_at";

const PROMOTE_INACTIVE: &str =
    "status = CASE WHEN status = 'inactive' THEN 'active' ELSE status END";

/// PostgreSQL-backed [`UserRepository`] over the `users` table.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn create(&self, user: &NewUser) -> AuthResult<UserRecord> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, name, password_hash, is_verified, status, user_type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.is_verified)
        .bind(user.status.as_str())
        .bind(&user.user_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthError::EmailAlreadyExists
            }
            _ => AuthError::from(e),
        })?;
        UserRecord::try_from(row)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        let result = sqlx::query("UPDATE users SET last_login = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn mark_verified(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_verified = true, {PROMOTE_INACTIVE}, updated_at = now() \
             WHERE id = $1 AND NOT is_verified \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn claim_unverified(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_verified = true, password_hash = NULL, {PROMOTE_INACTIVE}, \
             updated_at = now() \
             WHERE id = $1 AND NOT is_verified \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}
