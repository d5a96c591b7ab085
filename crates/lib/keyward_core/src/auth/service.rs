//! Registration, password login, access tokens and the email-driven
//! verification / reset / change-password flows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::jwt::{AccessToken, TokenIssuer};
use super::mailer::{MailKind, Mailer, best_effort};
use super::password::{PasswordHasher, validate_password};
use super::{AuthError, AuthResult};
use crate::config::AuthConfig;
use crate::store::{TokenKind, TokenStore, fingerprint};
use crate::users::{AccountStatus, NewUser, UserRecord, UserRepository, normalize_email};

/// Input to [`AuthService::register`].
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    /// Falls back to [`AuthConfig::default_user_type`].
    pub user_type: Option<String>,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The new, unverified account.
    pub user: UserRecord,
    /// Token redeemable through [`AuthService::verify_email`].
    pub verification_token: String,
    pub verification_expires_at: DateTime<Utc>,
    /// Whether the verification email was handed to the mailer.
    pub email_sent: bool,
}

/// Result of a successful password login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: AccessToken,
    pub user: UserRecord,
}

/// Orchestrates credential checks, token issuance and the email flows.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: TokenStore,
    mailer: Arc<dyn Mailer>,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: TokenStore,
        mailer: Arc<dyn Mailer>,
        config: AuthConfig,
    ) -> Self {
        let issuer = TokenIssuer::new(config.jwt_secret.as_bytes(), config.access_token_ttl);
        Self {
            users,
            tokens,
            mailer,
            issuer,
            hasher: PasswordHasher::new(),
            config,
        }
    }

    /// Replace the password hasher (e.g. a lower bcrypt cost in tests).
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Create an unverified account and send its verification email.
    ///
    /// A failed send is logged; the account and token stay valid and the
    /// email can be re-requested with [`Self::resend_verification_email`].
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<Registration> {
        let email = normalize_email(&request.email);
        validate_email(&email)?;
        validate_password(&request.password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let password_hash = self.hasher.hash(&request.password)?;
        let user = self
            .users
            .create(&NewUser {
                email: email.clone(),
                name: request.name.filter(|n| !n.trim().is_empty()),
                password_hash: Some(password_hash),
                is_verified: false,
                status: AccountStatus::Inactive,
                user_type: request
                    .user_type
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| self.config.default_user_type.clone()),
            })
            .await?;

        let (token, data) = self
            .tokens
            .issue(
                TokenKind::Verification,
                &email,
                self.config.verification_token_ttl,
            )
            .await?;

        let email_sent = best_effort(
            MailKind::Verification,
            self.mailer.send_verification(&email, &token).await,
        );

        info!(user_id = %user.id, "user registered");
        Ok(Registration {
            user,
            verification_token: token,
            verification_expires_at: data.expires_at,
            email_sent,
        })
    }

    /// Authenticate with email + password.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginResponse> {
        let email = normalize_email(email);
        let mut user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(password, hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active() {
            return Err(AuthError::AccountNotActive(user.status));
        }

        let now = Utc::now();
        match self.users.record_login(user.id, now).await {
            Ok(()) => user.last_login = Some(now),
            Err(e) => warn!(user_id = %user.id, error = %e, "failed to record last login"),
        }

        let access_token = self.issue_access_token(&user)?;
        info!(user_id = %user.id, "password login");
        Ok(LoginResponse { access_token, user })
    }

    /// Mint a new access token for a still-existing, still-active user.
    pub async fn refresh_token(&self, user_id: Uuid) -> AuthResult<AccessToken> {
        let user = self.active_user(user_id).await?;
        self.issue_access_token(&user)
    }

    /// Sign an access token carrying this user's claims.
    pub fn issue_access_token(&self, user: &UserRecord) -> AuthResult<AccessToken> {
        self.issuer.issue(user.id, &user.email, &user.user_type)
    }

    /// Verify an access token and return the live account it belongs to.
    ///
    /// The account status is re-read on every call, so suspending an account
    /// invalidates its outstanding tokens immediately.
    pub async fn validate_token(&self, token: &str) -> AuthResult<UserRecord> {
        let claims = self.issuer.verify(token)?;
        self.active_user(claims.user_id).await
    }

    /// Redeem a verification token.
    ///
    /// Already-verified accounts succeed without being touched again.
    pub async fn verify_email(&self, token: &str) -> AuthResult<UserRecord> {
        let data = self.tokens.consume(TokenKind::Verification, token).await?;
        let user = self
            .users
            .find_by_email(&data.email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if user.is_verified {
            return Ok(user);
        }

        let Some(user) = self.users.mark_verified(user.id).await? else {
            // Verified by a concurrent request in the meantime.
            return self
                .users
                .find_by_id(user.id)
                .await?
                .ok_or(AuthError::UserNotFound);
        };
        info!(user_id = %user.id, "email verified");

        best_effort(
            MailKind::Welcome,
            self.mailer
                .send_welcome(&user.email, user.name.as_deref())
                .await,
        );
        Ok(user)
    }

    /// Issue a fresh verification token and email it.
    pub async fn resend_verification_email(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.is_verified {
            return Err(AuthError::AlreadyVerified);
        }

        let (token, _) = self
            .tokens
            .issue(
                TokenKind::Verification,
                &email,
                self.config.verification_token_ttl,
            )
            .await?;
        best_effort(
            MailKind::Verification,
            self.mailer.send_verification(&email, &token).await,
        );
        Ok(())
    }

    /// Start a password reset.
    ///
    /// Returns nothing: callers get the same answer whether or not the email
    /// belongs to an account, and internal failures are only logged.
    pub async fn forgot_password(&self, email: &str) {
        let email = normalize_email(email);
        match self.users.find_by_email(&email).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "password reset lookup failed");
                return;
            }
        }

        let token = match self
            .tokens
            .issue(TokenKind::Reset, &email, self.config.reset_token_ttl)
            .await
        {
            Ok((token, _)) => token,
            Err(e) => {
                warn!(error = %e, "failed to store password reset token");
                return;
            }
        };

        best_effort(
            MailKind::PasswordReset,
            self.mailer.send_password_reset(&email, &token).await,
        );
    }

    /// Redeem a reset token and set a new password.
    ///
    /// The token is consumed up front, so it is spent whether the rest of the
    /// operation succeeds or not.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        validate_password(new_password)?;

        let data = self.tokens.consume(TokenKind::Reset, token).await?;
        let user = self
            .users
            .find_by_email(&data.email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let hash = self.hasher.hash(new_password)?;
        self.users.set_password_hash(user.id, &hash).await?;
        info!(user_id = %user.id, token = %fingerprint(token), "password reset");
        Ok(())
    }

    /// Change a password, given the current one.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        validate_password(new_password)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthError::InvalidCurrentPassword);
        };
        if !self.hasher.verify(current_password, hash)? {
            return Err(AuthError::InvalidCurrentPassword);
        }

        let hash = self.hasher.hash(new_password)?;
        self.users.set_password_hash(user.id, &hash).await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    async fn active_user(&self, user_id: Uuid) -> AuthResult<UserRecord> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active() {
            return Err(AuthError::AccountNotActive(user.status));
        }
        Ok(user)
    }
}

fn validate_email(email: &str) -> AuthResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AuthError::Validation("Invalid email address".into()));
    }
    Ok(())
}
