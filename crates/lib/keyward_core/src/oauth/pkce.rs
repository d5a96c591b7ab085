//! PKCE helpers (RFC 7636).

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::otp::constant_time_eq;
use crate::auth::{AuthError, AuthResult};

/// Code challenge derivation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
            ChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(ChallengeMethod::S256),
            "plain" => Ok(ChallengeMethod::Plain),
            other => Err(AuthError::UnsupportedChallengeMethod(other.to_string())),
        }
    }
}

/// Generate a cryptographic PKCE code verifier (43 chars, URL-safe).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute S256 code challenge from a code verifier.
pub fn compute_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Generate a cryptographic state parameter (CSRF token).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Check that `verifier` is well-formed per RFC 7636 §4.1.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Check a verifier against the challenge recorded at authorization time.
pub fn verify_code_verifier(
    verifier: &str,
    challenge: &str,
    method: ChallengeMethod,
) -> AuthResult<()> {
    if !is_valid_verifier(verifier) {
        return Err(AuthError::PkceVerificationFailed);
    }
    let derived = match method {
        ChallengeMethod::S256 => compute_code_challenge(verifier),
        ChallengeMethod::Plain => verifier.to_string(),
    };
    if constant_time_eq(derived.as_bytes(), challenge.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::PkceVerificationFailed)
    }
}
