//! Numeric one-time passcodes for registration flows that confirm a
//! contact channel by code instead of by link.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};

use super::{AuthError, AuthResult};

/// A generated OTP and the instant it stops being accepted.
///
/// Nothing in this crate sends codes. A registration flow that confirms a
/// phone number or email by code generates one here, delivers it itself,
/// and checks the reply with [`OtpCode::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl OtpCode {
    /// Generate a code of `digits` decimal digits (clamped to 4..=10).
    pub fn generate(digits: usize, ttl: Duration) -> Self {
        let digits = digits.clamp(4, 10);
        let mut r = rng();
        let code = (0..digits)
            .map(|_| char::from(b'0' + r.random_range(0..10u8)))
            .collect();
        Self {
            code,
            expires_at: Utc::now() + ttl,
        }
    }

    /// Check a candidate code. Expiry is checked first so a stale code never
    /// reports as merely wrong.
    pub fn verify(&self, candidate: &str) -> AuthResult<()> {
        self.verify_at(candidate, Utc::now())
    }

    pub fn verify_at(&self, candidate: &str, now: DateTime<Utc>) -> AuthResult<()> {
        if now >= self.expires_at {
            return Err(AuthError::TokenExpired);
        }
        if !constant_time_eq(self.code.as_bytes(), candidate.trim().as_bytes()) {
            return Err(AuthError::InvalidOtpCode);
        }
        Ok(())
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
