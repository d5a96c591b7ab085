//! Credential verification, access tokens and the email-driven account flows.
//!
//! Every operation in this crate reports failures through [`AuthError`], a
//! closed set of kinds the HTTP layer can branch on without inspecting
//! message text.

pub mod jwt;
pub mod mailer;
pub mod otp;
pub mod password;
pub mod service;

use thiserror::Error;

use crate::users::AccountStatus;

pub use service::AuthService;

/// Convenience alias for results produced by this crate.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately does not say which.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("{}", account_status_message(.0))]
    AccountNotActive(AccountStatus),

    #[error("Email already verified")]
    AlreadyVerified,

    #[error("Invalid verification token")]
    InvalidVerificationToken,

    #[error("Invalid reset token")]
    InvalidResetToken,

    /// A known single-use token that is past its TTL.
    #[error("Token expired")]
    TokenExpired,

    #[error("Current password is incorrect")]
    InvalidCurrentPassword,

    #[error("User not found")]
    UserNotFound,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh token revoked")]
    RefreshTokenRevoked,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token is missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("invalid state")]
    OAuthStateInvalid,

    #[error("redirect_uri not allowed")]
    RedirectUriNotAllowed,

    #[error("code_verifier required")]
    PkceVerifierRequired,

    #[error("PKCE verification failed")]
    PkceVerificationFailed,

    #[error("Unsupported code challenge method: {0}")]
    UnsupportedChallengeMethod(String),

    #[error("Invalid or expired code")]
    OneTimeCodeInvalid,

    #[error("Invalid OTP code")]
    InvalidOtpCode,

    #[error("Provider {0} not connected")]
    ProviderNotConnected(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// `true` for kinds the caller caused and can act on (bad input, bad
    /// credentials, spent tokens); `false` for infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            AuthError::Provider(_)
                | AuthError::Store(_)
                | AuthError::Database(_)
                | AuthError::Internal(_)
        )
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(e: redis::RedisError) -> Self {
        AuthError::Store(e.to_string())
    }
}

fn account_status_message(status: &AccountStatus) -> &'static str {
    match status {
        AccountStatus::Suspended => "account is suspended",
        AccountStatus::Deactivated => "account is deactivated",
        AccountStatus::Active | AccountStatus::Inactive => "account is not active",
    }
}
