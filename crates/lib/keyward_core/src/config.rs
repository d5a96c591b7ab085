//! Runtime configuration.
//!
//! Everything is read from environment variables with sensible defaults.
//! The Google client can alternatively come from a downloaded credentials
//! bundle (`GOOGLE_CREDENTIALS_FILE`).

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;

use crate::auth::jwt::{DEFAULT_ACCESS_TOKEN_TTL_SECS, resolve_jwt_secret};
use crate::auth::{AuthError, AuthResult};
use crate::store::oauth_state::DEFAULT_STATE_TTL;
use crate::store::one_time_code::{DEFAULT_CODE_TTL, MAX_CODE_TTL};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Where transient tokens live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process map; single instance or tests.
    Memory,
    /// Shared Redis; required when running more than one instance.
    Redis { url: String },
}

/// Refresh-session lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub default_ttl: Duration,
    pub remember_me_ttl: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::days(7),
            remember_me_ttl: Duration::days(30),
        }
    }
}

/// Configuration for [`crate::auth::AuthService`] and friends.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub verification_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    /// `user_type` given to accounts created without one.
    pub default_user_type: String,
    pub store: StoreBackend,
    /// Passphrase for encrypting provider tokens at rest.
    pub token_encryption_key: String,
    pub refresh: RefreshConfig,
}

impl AuthConfig {
    /// Defaults around an explicit signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            verification_token_ttl: Duration::hours(24),
            reset_token_ttl: Duration::hours(1),
            default_user_type: "user".into(),
            store: StoreBackend::Memory,
            token_encryption_key: "keyward-default-dev-key-change-in-production".into(),
            refresh: RefreshConfig::default(),
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                         | Default                         |
    /// |----------------------------------|---------------------------------|
    /// | `JWT_SECRET` / `AUTH_SECRET`     | generated & persisted to file   |
    /// | `ACCESS_TOKEN_TTL_SECS`          | `86400`                         |
    /// | `VERIFICATION_TOKEN_TTL_SECS`    | `86400`                         |
    /// | `RESET_TOKEN_TTL_SECS`           | `3600`                          |
    /// | `REFRESH_TOKEN_TTL_DAYS`         | `7`                             |
    /// | `REFRESH_TOKEN_REMEMBER_ME_DAYS` | `30`                            |
    /// | `TOKEN_STORE`                    | `memory` (or `redis`)           |
    /// | `REDIS_URL`                      | `redis://127.0.0.1:6379`        |
    /// | `TOKEN_ENCRYPTION_KEY`           | dev key                         |
    /// | `DEFAULT_USER_TYPE`              | `user`                          |
    pub fn from_env() -> Self {
        Self::from_lookup(resolve_jwt_secret(), |k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. `jwt_secret` is resolved by the
    /// caller so that lookup stays free of side effects.
    pub fn from_lookup(jwt_secret: String, get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new(jwt_secret);
        let secs = |k: &str, d: Duration| {
            parse_positive(get(k)).map(Duration::seconds).unwrap_or(d)
        };
        let days = |k: &str, d: Duration| parse_positive(get(k)).map(Duration::days).unwrap_or(d);

        let store = match get("TOKEN_STORE").as_deref().map(str::trim) {
            Some("redis") => StoreBackend::Redis {
                url: non_empty(get("REDIS_URL")).unwrap_or_else(|| DEFAULT_REDIS_URL.into()),
            },
            _ => StoreBackend::Memory,
        };

        Self {
            access_token_ttl: secs("ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl),
            verification_token_ttl: secs(
                "VERIFICATION_TOKEN_TTL_SECS",
                defaults.verification_token_ttl,
            ),
            reset_token_ttl: secs("RESET_TOKEN_TTL_SECS", defaults.reset_token_ttl),
            default_user_type: non_empty(get("DEFAULT_USER_TYPE"))
                .unwrap_or(defaults.default_user_type.clone()),
            store,
            token_encryption_key: non_empty(get("TOKEN_ENCRYPTION_KEY"))
                .unwrap_or(defaults.token_encryption_key.clone()),
            refresh: RefreshConfig {
                default_ttl: days("REFRESH_TOKEN_TTL_DAYS", defaults.refresh.default_ttl),
                remember_me_ttl: days(
                    "REFRESH_TOKEN_REMEMBER_ME_DAYS",
                    defaults.refresh.remember_me_ttl,
                ),
            },
            ..defaults
        }
    }
}

/// Third-party identity provider settings.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    /// Provider name recorded on connections (e.g. `"google"`).
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    /// This service's callback URL registered with the provider.
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
    /// Redirect URIs a `mobile` client may declare, and the only accepted
    /// `post_login_redirect` targets for any client.
    pub mobile_redirect_uris: Vec<String>,
    /// Accept `code_challenge_method=plain`. Off unless set explicitly.
    pub allow_plain_pkce: bool,
    pub state_ttl: StdDuration,
    pub one_time_code_ttl: StdDuration,
}

impl OAuthConfig {
    /// Google defaults around explicit client credentials.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider: "google".into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_url: GOOGLE_AUTH_URL.into(),
            token_url: GOOGLE_TOKEN_URL.into(),
            userinfo_url: GOOGLE_USERINFO_URL.into(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            mobile_redirect_uris: Vec::new(),
            allow_plain_pkce: false,
            state_ttl: DEFAULT_STATE_TTL,
            one_time_code_ttl: DEFAULT_CODE_TTL,
        }
    }

    /// Reads `GOOGLE_*` / `OAUTH_*` variables. When `GOOGLE_CREDENTIALS_FILE`
    /// is set, client id, secret, redirect URI and endpoints come from that
    /// bundle and any individual `GOOGLE_*` variable overrides it.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AuthResult<Self> {
        let mut config = match non_empty(get("GOOGLE_CREDENTIALS_FILE")) {
            Some(path) => Self::from_credentials_file(path)?,
            None => Self::google(String::new(), String::new(), String::new()),
        };

        if let Some(v) = non_empty(get("GOOGLE_CLIENT_ID")) {
            config.client_id = v;
        }
        if let Some(v) = non_empty(get("GOOGLE_CLIENT_SECRET")) {
            config.client_secret = v;
        }
        if let Some(v) = non_empty(get("GOOGLE_REDIRECT_URI")) {
            config.redirect_uri = v;
        }
        if let Some(v) = non_empty(get("OAUTH_MOBILE_REDIRECT_URIS")) {
            config.mobile_redirect_uris = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config.allow_plain_pkce = get("OAUTH_ALLOW_PLAIN_PKCE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if let Some(secs) = parse_positive(get("OAUTH_STATE_TTL_SECS")) {
            config.state_ttl = StdDuration::from_secs(secs as u64);
        }
        if let Some(secs) = parse_positive(get("OAUTH_ONE_TIME_CODE_TTL_SECS")) {
            config.one_time_code_ttl = StdDuration::from_secs(secs as u64).min(MAX_CODE_TTL);
        }

        if config.client_id.is_empty() {
            return Err(AuthError::Validation(
                "GOOGLE_CLIENT_ID or GOOGLE_CREDENTIALS_FILE is required".into(),
            ));
        }
        Ok(config)
    }

    /// Load a Google "OAuth client" JSON bundle (`{"web": {...}}` or
    /// `{"installed": {...}}`).
    pub fn from_credentials_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Validation(format!("credentials file {}: {e}", path.display()))
        })?;
        Self::from_credentials_json(&raw)
    }

    pub fn from_credentials_json(raw: &str) -> AuthResult<Self> {
        let bundle: CredentialsBundle = serde_json::from_str(raw)
            .map_err(|e| AuthError::Validation(format!("credentials file: {e}")))?;
        let client = bundle.web.or(bundle.installed).ok_or_else(|| {
            AuthError::Validation("credentials file has no `web` or `installed` client".into())
        })?;

        let mut config = Self::google(
            client.client_id,
            client.client_secret,
            client.redirect_uris.into_iter().next().unwrap_or_default(),
        );
        if let Some(auth_uri) = client.auth_uri {
            config.auth_url = auth_uri;
        }
        if let Some(token_uri) = client.token_uri {
            config.token_url = token_uri;
        }
        Ok(config)
    }
}

#[derive(Deserialize)]
struct CredentialsBundle {
    web: Option<CredentialsClient>,
    installed: Option<CredentialsClient>,
}

#[derive(Deserialize)]
struct CredentialsClient {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive(value: Option<String>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}
