//! Third-party login over the OAuth2 authorization-code flow with PKCE.
//!
//! Two PKCE legs are in play. The client may protect its leg (client to this
//! service) with its own challenge, which [`OAuthService::exchange_code`]
//! enforces. This service protects its own leg (service to provider) with a
//! verifier it generates and keeps in the state record, so the provider
//! exchange completes on both the redirect callback and the direct exchange.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::ClientType;
use super::connections::{ConnectedProvider, ConnectionRepository, ConnectionUpsert};
use super::pkce::{
    ChallengeMethod, compute_code_challenge, generate_code_verifier, generate_state,
    verify_code_verifier,
};
use super::provider::{IdentityProvider, ProviderIdentity};
use crate::auth::jwt::AccessToken;
use crate::auth::{AuthError, AuthResult, AuthService};
use crate::config::OAuthConfig;
use crate::secrets::TokenCipher;
use crate::store::{EphemeralStore, OAuthStateData, OAuthStateStore, OneTimeCodeStore, fingerprint};
use crate::users::{AccountStatus, NewUser, UserRecord, UserRepository, normalize_email};

/// Input to [`OAuthService::get_auth_url`].
#[derive(Debug, Clone)]
pub struct AuthUrlRequest {
    pub client_type: ClientType,
    pub redirect_uri: Option<String>,
    /// Deep link a native client wants to land on after the callback.
    pub post_login_redirect: Option<String>,
    pub code_challenge: Option<String>,
    /// `S256` (default) or `plain`.
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
    pub state: String,
    pub expires_in: u64,
}

/// Input to [`OAuthService::exchange_code`].
#[derive(Debug, Clone)]
pub struct ExchangeCodeRequest {
    pub code: String,
    pub state: String,
    pub code_verifier: Option<String>,
}

/// A completed provider login.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthLogin {
    pub access_token: AccessToken,
    pub user: UserRecord,
    /// The account was created by this login.
    pub is_new_user: bool,
}

/// What the callback handler should do next.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Send the browser to `location` (a deep link carrying a one-time code,
    /// or the token fragment fallback).
    Redirect { location: String },
    /// No deep link was requested; hand the session to the caller directly.
    Session(OAuthLogin),
}

/// Result of redeeming a one-time code.
#[derive(Debug, Clone, Serialize)]
pub struct OneTimeCodeLogin {
    pub access_token: String,
    pub user: UserRecord,
}

/// Orchestrates provider login and the one-time-code handoff.
pub struct OAuthService {
    config: OAuthConfig,
    states: OAuthStateStore,
    codes: OneTimeCodeStore,
    provider: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserRepository>,
    connections: Arc<dyn ConnectionRepository>,
    auth: Arc<AuthService>,
    cipher: TokenCipher,
}

impl OAuthService {
    pub fn new(
        config: OAuthConfig,
        store: Arc<dyn EphemeralStore>,
        provider: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserRepository>,
        connections: Arc<dyn ConnectionRepository>,
        auth: Arc<AuthService>,
    ) -> Self {
        let cipher = TokenCipher::new(&auth.config().token_encryption_key);
        Self {
            states: OAuthStateStore::with_ttl(store.clone(), config.state_ttl),
            codes: OneTimeCodeStore::new(store),
            config,
            provider,
            users,
            connections,
            auth,
            cipher,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Start an authorization request.
    ///
    /// Redirect targets are checked against the allow-list before any state
    /// is written. Mobile clients must name an allowed `redirect_uri`, and a
    /// `post_login_redirect` must be allowed for every client type since the
    /// callback hands it a login.
    pub async fn get_auth_url(&self, request: AuthUrlRequest) -> AuthResult<AuthUrlResponse> {
        let allowed = |uri: &str| self.config.mobile_redirect_uris.iter().any(|a| a == uri);
        if request.client_type == ClientType::Mobile
            && !request.redirect_uri.as_deref().is_some_and(allowed)
        {
            return Err(AuthError::RedirectUriNotAllowed);
        }
        if let Some(post) = request.post_login_redirect.as_deref()
            && !allowed(post)
        {
            return Err(AuthError::RedirectUriNotAllowed);
        }

        let code_challenge = request.code_challenge.filter(|c| !c.is_empty());
        let code_challenge_method = match &code_challenge {
            Some(_) => Some(self.challenge_method(request.code_challenge_method.as_deref())?),
            None => None,
        };

        let state = generate_state();
        let provider_code_verifier = generate_code_verifier();
        let url = self
            .provider
            .authorization_url(&state, &compute_code_challenge(&provider_code_verifier))?;

        let data = OAuthStateData {
            client_type: request.client_type,
            redirect_uri: request.redirect_uri,
            post_login_redirect: request.post_login_redirect,
            code_challenge,
            code_challenge_method,
            provider_code_verifier,
            created_at: Utc::now(),
        };
        self.states.save(&state, &data).await?;
        debug!(
            client_type = %data.client_type,
            pkce = data.code_challenge.is_some(),
            "oauth authorization started"
        );

        Ok(AuthUrlResponse {
            url,
            state,
            expires_in: self.states.ttl().as_secs(),
        })
    }

    /// Handle the provider's redirect back to this service.
    ///
    /// With a recorded deep link, the access token travels as a one-time
    /// code (`?code=`). If the code cannot be stored, the token is placed in
    /// the URL fragment (`#token=`) instead.
    pub async fn handle_callback(&self, code: &str, state: &str) -> AuthResult<CallbackOutcome> {
        let data = self.states.consume(state).await?;
        let login = self.complete_login(code, &data).await?;

        let Some(target) = data.post_login_redirect.as_deref() else {
            return Ok(CallbackOutcome::Session(login));
        };

        let location = match self
            .codes
            .create(&login.access_token.token, self.config.one_time_code_ttl)
            .await
        {
            Ok(one_time) => with_query(target, "code", &one_time),
            Err(e) => {
                warn!(error = %e, "one-time code unavailable, using fragment redirect");
                with_fragment(target, &format!("token={}", login.access_token.token))
            }
        };
        Ok(CallbackOutcome::Redirect { location })
    }

    /// Complete a flow whose browser step the client handled itself.
    ///
    /// The state is consumed before the verifier is checked, so a failed
    /// attempt cannot be retried with the same state.
    pub async fn exchange_code(&self, request: ExchangeCodeRequest) -> AuthResult<OAuthLogin> {
        let data = self.states.consume(&request.state).await?;

        if let Some(challenge) = data.code_challenge.as_deref() {
            let verifier = request
                .code_verifier
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::PkceVerifierRequired)?;
            verify_code_verifier(
                verifier,
                challenge,
                data.code_challenge_method.unwrap_or(ChallengeMethod::S256),
            )?;
        }

        self.complete_login(&request.code, &data).await
    }

    /// Wrap an already-minted access token in a one-time code. `ttl`
    /// defaults to the configured lifetime.
    pub async fn create_one_time_code(
        &self,
        access_token: &str,
        ttl: Option<Duration>,
    ) -> AuthResult<String> {
        self.codes
            .create(access_token, ttl.unwrap_or(self.config.one_time_code_ttl))
            .await
    }

    /// Redeem a one-time code. The code is gone after this call even when
    /// the token it carried no longer validates.
    pub async fn consume_one_time_code(&self, code: &str) -> AuthResult<OneTimeCodeLogin> {
        let access_token = self.codes.consume(code).await?;
        let user = self.auth.validate_token(&access_token).await?;
        info!(user_id = %user.id, code = %fingerprint(code), "one-time code redeemed");
        Ok(OneTimeCodeLogin { access_token, user })
    }

    pub async fn get_connected_providers(&self, user_id: Uuid) -> AuthResult<Vec<ConnectedProvider>> {
        let connections = self.connections.list_for_user(user_id).await?;
        Ok(connections.iter().map(ConnectedProvider::from).collect())
    }

    /// Remove a provider link. An account without a password keeps at least
    /// one provider.
    pub async fn disconnect_oauth_provider(&self, user_id: Uuid, provider: &str) -> AuthResult<()> {
        let connections = self.connections.list_for_user(user_id).await?;
        if !connections.iter().any(|c| c.provider == provider) {
            return Err(AuthError::ProviderNotConnected(provider.to_string()));
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.password_hash.is_none() && connections.len() == 1 {
            return Err(AuthError::Validation(
                "cannot disconnect the only sign-in method; set a password first".into(),
            ));
        }

        if !self.connections.deactivate(user_id, provider).await? {
            return Err(AuthError::ProviderNotConnected(provider.to_string()));
        }
        info!(user_id = %user_id, provider, "oauth provider disconnected");
        Ok(())
    }

    fn challenge_method(&self, requested: Option<&str>) -> AuthResult<ChallengeMethod> {
        let method = match requested.filter(|m| !m.is_empty()) {
            Some(m) => m.parse()?,
            None => ChallengeMethod::S256,
        };
        if method == ChallengeMethod::Plain && !self.config.allow_plain_pkce {
            return Err(AuthError::UnsupportedChallengeMethod(method.to_string()));
        }
        Ok(method)
    }

    async fn complete_login(&self, code: &str, data: &OAuthStateData) -> AuthResult<OAuthLogin> {
        let tokens = self
            .provider
            .exchange_code(code, Some(&data.provider_code_verifier))
            .await?;
        let identity = self.provider.fetch_identity(&tokens).await?;

        let (mut user, is_new_user) = self.resolve_account(&identity).await?;
        if !user.is_active() {
            return Err(AuthError::AccountNotActive(user.status));
        }

        self.connections
            .upsert(&ConnectionUpsert {
                user_id: user.id,
                provider: self.provider.name().to_string(),
                provider_user_id: identity.provider_user_id.clone(),
                profile: identity.raw.clone(),
                access_token_enc: Some(self.cipher.encrypt(&tokens.access_token)?),
                refresh_token_enc: self.cipher.encrypt_opt(tokens.refresh_token.as_deref())?,
            })
            .await?;

        let now = Utc::now();
        match self.users.record_login(user.id, now).await {
            Ok(()) => user.last_login = Some(now),
            Err(e) => warn!(user_id = %user.id, error = %e, "failed to record last login"),
        }

        let access_token = self.auth.issue_access_token(&user)?;
        info!(
            user_id = %user.id,
            provider = self.provider.name(),
            is_new_user,
            "oauth login"
        );
        Ok(OAuthLogin {
            access_token,
            user,
            is_new_user,
        })
    }

    /// Existing link first, then a verified email match, else a new account.
    ///
    /// Linking to a never-verified local account drops its password: the
    /// provider proved who owns the email, the registrant did not.
    async fn resolve_account(&self, identity: &ProviderIdentity) -> AuthResult<(UserRecord, bool)> {
        if let Some(conn) = self
            .connections
            .find_by_provider_user(self.provider.name(), &identity.provider_user_id)
            .await?
            && let Some(user) = self.users.find_by_id(conn.user_id).await?
        {
            return Ok((user, false));
        }

        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::Provider("provider returned no email".into()))?;

        if let Some(user) = self.users.find_by_email(&email).await? {
            if !identity.email_verified {
                return Err(AuthError::EmailAlreadyExists);
            }
            let user = if user.is_verified {
                user
            } else {
                match self.users.claim_unverified(user.id).await? {
                    Some(claimed) => {
                        info!(user_id = %claimed.id, "unverified account claimed by provider login");
                        claimed
                    }
                    None => self
                        .users
                        .find_by_id(user.id)
                        .await?
                        .ok_or(AuthError::UserNotFound)?,
                }
            };
            debug!(user_id = %user.id, "provider identity linked by email");
            return Ok((user, false));
        }

        let user = self
            .users
            .create(&NewUser {
                email,
                name: identity.name.clone(),
                password_hash: None,
                is_verified: true,
                status: AccountStatus::Active,
                user_type: self.auth.config().default_user_type.clone(),
            })
            .await?;
        Ok((user, true))
    }
}

fn with_query(target: &str, key: &str, value: &str) -> String {
    match Url::parse(target) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(key, value);
            url.into()
        }
        Err(_) => {
            let sep = if target.contains('?') { '&' } else { '?' };
            format!("{target}{sep}{key}={value}")
        }
    }
}

fn with_fragment(target: &str, fragment: &str) -> String {
    match Url::parse(target) {
        Ok(mut url) => {
            url.set_fragment(Some(fragment));
            url.into()
        }
        Err(_) => format!("{target}#{fragment}"),
    }
}
