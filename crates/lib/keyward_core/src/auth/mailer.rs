//! Outbound email collaborator.
//!
//! Delivery and templating live outside this crate. The auth flows only need
//! to ask for three messages, and every one of them is best-effort: a failed
//! send is logged and never turns the surrounding operation into a failure.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error reported by a [`Mailer`] implementation.
#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Email dispatch capability consumed by [`crate::auth::AuthService`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), MailError>;

    async fn send_password_reset(&self, email: &str, token: &str) -> Result<(), MailError>;

    async fn send_welcome(&self, email: &str, name: Option<&str>) -> Result<(), MailError>;
}

/// Which message a best-effort send was for, used in log output.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MailKind {
    Verification,
    PasswordReset,
    Welcome,
}

/// Log the outcome of a best-effort send and swallow the error.
///
/// Returns whether the message was handed off.
pub(crate) fn best_effort(kind: MailKind, result: Result<(), MailError>) -> bool {
    match result {
        Ok(()) => {
            debug!(?kind, "email dispatched");
            true
        }
        Err(e) => {
            warn!(?kind, error = %e, "email dispatch failed; continuing");
            false
        }
    }
}

/// Mailer for deployments without outbound email. Records who would have
/// been mailed and drops the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, _token: &str) -> Result<(), MailError> {
        info!(to = email, kind = ?MailKind::Verification, "email delivery not configured");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, _token: &str) -> Result<(), MailError> {
        info!(to = email, kind = ?MailKind::PasswordReset, "email delivery not configured");
        Ok(())
    }

    async fn send_welcome(&self, email: &str, _name: Option<&str>) -> Result<(), MailError> {
        info!(to = email, kind = ?MailKind::Welcome, "email delivery not configured");
        Ok(())
    }
}
