//! In-memory collaborators for service-level tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::auth::AuthService;
use keyward_core::auth::mailer::{MailError, Mailer};
use keyward_core::auth::password::PasswordHasher;
use keyward_core::auth::service::RegisterRequest;
use keyward_core::config::AuthConfig;
use keyward_core::oauth::connections::{ConnectionRepository, ConnectionUpsert, OAuthConnection};
use keyward_core::oauth::provider::{IdentityProvider, ProviderIdentity, ProviderTokens};
use keyward_core::refresh::{NewRefreshToken, RefreshTokenRecord, RefreshTokenRepository};
use keyward_core::store::{MemoryStore, TokenStore};
use keyward_core::users::{AccountStatus, NewUser, UserRecord, UserRepository};
use keyward_core::{AuthError, AuthResult};
use uuid::Uuid;

pub const PASSWORD: &str = "Secret123!";

// =============================================================================
// Users
// =============================================================================

type ReadHook = Box<dyn FnOnce(&mut UserRecord) + Send>;

#[derive(Default)]
pub struct MemUsers {
    users: Mutex<Vec<UserRecord>>,
    fail_updates: AtomicBool,
    after_read: Mutex<Option<ReadHook>>,
}

impl MemUsers {
    pub fn get(&self, id: Uuid) -> Option<UserRecord> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    pub fn by_email(&self, email: &str) -> Option<UserRecord> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    /// Overwrite a stored record directly, bypassing the repository trait.
    pub fn put(&self, user: UserRecord) {
        let mut users = self.users.lock().unwrap();
        users.retain(|u| u.id != user.id);
        users.push(user);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Mutate the stored record right after the next repository lookup has
    /// handed out its snapshot, as a concurrent writer would.
    pub fn after_next_read(&self, hook: impl FnOnce(&mut UserRecord) + Send + 'static) {
        *self.after_read.lock().unwrap() = Some(Box::new(hook));
    }

    fn lookup(&self, matches: impl Fn(&UserRecord) -> bool) -> Option<UserRecord> {
        let mut users = self.users.lock().unwrap();
        let slot = users.iter_mut().find(|u| matches(u))?;
        let snapshot = slot.clone();
        if let Some(hook) = self.after_read.lock().unwrap().take() {
            hook(slot);
        }
        Some(snapshot)
    }

    fn write<T>(&self, id: Uuid, f: impl FnOnce(&mut UserRecord) -> T) -> AuthResult<T> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("update failed".into()));
        }
        let mut users = self.users.lock().unwrap();
        let slot = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AuthError::UserNotFound)?;
        Ok(f(slot))
    }

    fn verify(&self, id: Uuid, drop_password: bool) -> AuthResult<Option<UserRecord>> {
        self.write(id, |u| {
            if u.is_verified {
                return None;
            }
            u.is_verified = true;
            if u.status == AccountStatus::Inactive {
                u.status = AccountStatus::Active;
            }
            if drop_password {
                u.password_hash = None;
            }
            u.updated_at = Utc::now();
            Some(u.clone())
        })
    }
}

#[async_trait]
impl UserRepository for MemUsers {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        Ok(self.lookup(|u| u.email == email))
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        Ok(self.lookup(|u| u.id == id))
    }

    async fn create(&self, user: &NewUser) -> AuthResult<UserRecord> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyExists);
        }
        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::now_v7(),
            email: user.email.clone(),
            name: user.name.clone(),
            password_hash: user.password_hash.clone(),
            is_verified: user.is_verified,
            status: user.status,
            user_type: user.user_type.clone(),
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        self.write(id, |u| {
            u.last_login = Some(at);
            u.updated_at = Utc::now();
        })
    }

    async fn mark_verified(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        self.verify(id, false)
    }

    async fn claim_unverified(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        self.verify(id, true)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()> {
        self.write(id, |u| {
            u.password_hash = Some(password_hash.to_string());
            u.updated_at = Utc::now();
        })
    }
}

// =============================================================================
// Mailer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Verification { email: String, token: String },
    PasswordReset { email: String, token: String },
    Welcome { email: String },
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_reset_token(&self) -> Option<String> {
        self.sent().into_iter().rev().find_map(|m| match m {
            SentMail::PasswordReset { token, .. } => Some(token),
            _ => None,
        })
    }

    pub fn last_verification_token(&self) -> Option<String> {
        self.sent().into_iter().rev().find_map(|m| match m {
            SentMail::Verification { token, .. } => Some(token),
            _ => None,
        })
    }

    pub fn welcome_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, SentMail::Welcome { .. }))
            .count()
    }

    fn record(&self, mail: SentMail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError("smtp unavailable".into()));
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), MailError> {
        self.record(SentMail::Verification {
            email: email.into(),
            token: token.into(),
        })
    }

    async fn send_password_reset(&self, email: &str, token: &str) -> Result<(), MailError> {
        self.record(SentMail::PasswordReset {
            email: email.into(),
            token: token.into(),
        })
    }

    async fn send_welcome(&self, email: &str, _name: Option<&str>) -> Result<(), MailError> {
        self.record(SentMail::Welcome {
            email: email.into(),
        })
    }
}

// =============================================================================
// OAuth connections
// =============================================================================

#[derive(Default)]
pub struct MemConnections {
    rows: Mutex<Vec<OAuthConnection>>,
}

impl MemConnections {
    pub fn all(&self) -> Vec<OAuthConnection> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionRepository for MemConnections {
    async fn find_by_provider_user(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<OAuthConnection>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.is_active && c.provider == provider && c.provider_user_id == provider_user_id)
            .cloned())
    }

    async fn upsert(&self, conn: &ConnectionUpsert) -> AuthResult<OAuthConnection> {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        if let Some(row) = rows
            .iter_mut()
            .find(|c| c.user_id == conn.user_id && c.provider == conn.provider)
        {
            row.provider_user_id = conn.provider_user_id.clone();
            row.profile = conn.profile.clone();
            row.access_token_enc = conn.access_token_enc.clone();
            if conn.refresh_token_enc.is_some() {
                row.refresh_token_enc = conn.refresh_token_enc.clone();
            }
            row.is_active = true;
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = OAuthConnection {
            id: Uuid::now_v7(),
            user_id: conn.user_id,
            provider: conn.provider.clone(),
            provider_user_id: conn.provider_user_id.clone(),
            profile: conn.profile.clone(),
            access_token_enc: conn.access_token_enc.clone(),
            refresh_token_enc: conn.refresh_token_enc.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<OAuthConnection>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id && c.is_active)
            .cloned()
            .collect())
    }

    async fn deactivate(&self, user_id: Uuid, provider: &str) -> AuthResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|c| c.user_id == user_id && c.provider == provider && c.is_active)
        {
            Some(row) => {
                row.is_active = false;
                row.access_token_enc = None;
                row.refresh_token_enc = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Refresh tokens
// =============================================================================

#[derive(Default)]
pub struct MemRefreshTokens {
    rows: Mutex<Vec<RefreshTokenRecord>>,
}

impl MemRefreshTokens {
    pub fn all(&self) -> Vec<RefreshTokenRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn set_expires_at(&self, device_id: &str, expires_at: DateTime<Utc>) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.device_id == device_id {
                row.expires_at = expires_at;
            }
        }
    }

    pub fn set_revoked_at(&self, device_id: &str, revoked_at: DateTime<Utc>) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.device_id == device_id && row.is_revoked {
                row.revoked_at = Some(revoked_at);
            }
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for MemRefreshTokens {
    async fn replace_for_device(
        &self,
        token: &NewRefreshToken,
        reason: &str,
    ) -> AuthResult<(RefreshTokenRecord, u64)> {
        let mut rows = self.rows.lock().unwrap();
        let mut revoked = 0;
        for row in rows.iter_mut() {
            if row.user_id == token.user_id && row.device_id == token.device_id && !row.is_revoked
            {
                row.is_revoked = true;
                row.revoked_at = Some(Utc::now());
                row.revoked_reason = Some(reason.to_string());
                revoked += 1;
            }
        }
        let record = RefreshTokenRecord {
            id: Uuid::now_v7(),
            user_id: token.user_id,
            token_hash: token.token_hash.clone(),
            device_id: token.device_id.clone(),
            device_name: token.device_name.clone(),
            device_type: token.device_type.clone(),
            user_agent: token.user_agent.clone(),
            ip_address: token.ip_address.clone(),
            last_used_at: None,
            expires_at: token.expires_at,
            is_revoked: false,
            revoked_at: None,
            revoked_reason: None,
            created_at: Utc::now(),
        };
        rows.push(record.clone());
        Ok((record, revoked))
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn rotate(
        &self,
        id: Uuid,
        old_hash: &str,
        new_hash: &str,
        used_at: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|r| r.id == id && r.token_hash == old_hash && !r.is_revoked)
        {
            Some(row) => {
                row.token_hash = new_hash.to_string();
                row.last_used_at = Some(used_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_for_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        reason: &str,
    ) -> AuthResult<u64> {
        let mut n = 0;
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.user_id == user_id && row.device_id == device_id && !row.is_revoked {
                row.is_revoked = true;
                row.revoked_at = Some(Utc::now());
                row.revoked_reason = Some(reason.to_string());
                n += 1;
            }
        }
        Ok(n)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> AuthResult<u64> {
        let mut n = 0;
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.user_id == user_id && !row.is_revoked {
                row.is_revoked = true;
                row.revoked_at = Some(Utc::now());
                row.revoked_reason = Some(reason.to_string());
                n += 1;
            }
        }
        Ok(n)
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AuthResult<Vec<RefreshTokenRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && !r.is_revoked && r.expires_at > now)
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.expires_at > now);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_revoked_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !(r.is_revoked && r.revoked_at.is_some_and(|at| at < cutoff)));
        Ok((before - rows.len()) as u64)
    }
}

// =============================================================================
// Identity provider
// =============================================================================

/// Provider double that returns a configurable identity for any code.
pub struct FakeProvider {
    identity: Mutex<ProviderIdentity>,
    exchanges: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeProvider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity: Mutex::new(identity),
            exchanges: Mutex::new(Vec::new()),
        }
    }

    pub fn set_identity(&self, identity: ProviderIdentity) {
        *self.identity.lock().unwrap() = identity;
    }

    /// `(code, verifier)` of every exchange attempted.
    pub fn exchanges(&self) -> Vec<(String, Option<String>)> {
        self.exchanges.lock().unwrap().clone()
    }
}

pub fn google_identity(sub: &str, email: &str, verified: bool) -> ProviderIdentity {
    ProviderIdentity {
        provider_user_id: sub.into(),
        email: Some(email.into()),
        email_verified: verified,
        name: Some("Jane Doe".into()),
        picture: None,
        raw: serde_json::json!({ "sub": sub, "email": email, "email_verified": verified }),
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> AuthResult<String> {
        Ok(format!(
            "https://accounts.example.com/auth?state={state}&code_challenge={code_challenge}"
        ))
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> AuthResult<ProviderTokens> {
        self.exchanges
            .lock()
            .unwrap()
            .push((code.to_string(), code_verifier.map(String::from)));
        if code == "bad-code" {
            return Err(AuthError::Provider("invalid_grant".into()));
        }
        Ok(ProviderTokens {
            access_token: format!("provider-access-{code}"),
            refresh_token: Some("provider-refresh".into()),
            expires_in: Some(3599),
            id_token: None,
            scope: None,
        })
    }

    async fn fetch_identity(&self, _tokens: &ProviderTokens) -> AuthResult<ProviderIdentity> {
        Ok(self.identity.lock().unwrap().clone())
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub struct Harness {
    pub users: Arc<MemUsers>,
    pub mailer: Arc<RecordingMailer>,
    pub store: Arc<MemoryStore>,
    pub auth: Arc<AuthService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(RecordingMailer::default(), AuthConfig::new("test-secret"))
    }

    pub fn with_mailer(mailer: RecordingMailer) -> Self {
        Self::build(mailer, AuthConfig::new("test-secret"))
    }

    pub fn with_config(config: AuthConfig) -> Self {
        Self::build(RecordingMailer::default(), config)
    }

    fn build(mailer: RecordingMailer, config: AuthConfig) -> Self {
        let users = Arc::new(MemUsers::default());
        let mailer = Arc::new(mailer);
        let store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(
            users.clone(),
            TokenStore::new(store.clone()),
            mailer.clone(),
            config,
        )
        .with_hasher(PasswordHasher::with_cost(4));
        Self {
            users,
            mailer,
            store,
            auth: Arc::new(auth),
        }
    }

    /// Register and verify an account, returning the active record.
    pub async fn active_user(&self, email: &str) -> UserRecord {
        let registration = self
            .auth
            .register(RegisterRequest {
                email: email.into(),
                password: PASSWORD.into(),
                name: None,
                user_type: None,
            })
            .await
            .expect("register");
        self.auth
            .verify_email(&registration.verification_token)
            .await
            .expect("verify")
    }
}
