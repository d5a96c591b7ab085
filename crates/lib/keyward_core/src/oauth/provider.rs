//! Identity-provider client.
//!
//! [`IdentityProvider`] is the seam between the OAuth flow and the network.
//! [`GoogleProvider`] talks to Google's token and userinfo endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::auth::{AuthError, AuthResult};
use crate::config::OAuthConfig;

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
}

/// Who the provider says signed in.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    /// Provider-assigned stable user id (`sub`).
    pub provider_user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// Full userinfo payload, stored as the connection's profile snapshot.
    pub raw: serde_json::Value,
}

/// A third-party OAuth2 / OpenID Connect provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name recorded on connections.
    fn name(&self) -> &str;

    /// Browser authorization URL for `state` and an S256 `code_challenge`.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> AuthResult<String>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> AuthResult<ProviderTokens>;

    /// Resolve the signed-in identity from the provider's tokens.
    async fn fetch_identity(&self, tokens: &ProviderTokens) -> AuthResult<ProviderIdentity>;
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

/// Google OpenID Connect.
#[derive(Clone)]
pub struct GoogleProvider {
    client: reqwest::Client,
    config: OAuthConfig,
}

impl GoogleProvider {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: OAuthConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> AuthResult<String> {
        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::Internal(format!("invalid auth_url: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> AuthResult<ProviderTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("Token exchange failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Provider(format!(
                "Token exchange HTTP {status}: {body}"
            )));
        }

        let tokens = resp
            .json::<ProviderTokens>()
            .await
            .map_err(|e| AuthError::Provider(format!("Token response parse error: {e}")))?;
        debug!(provider = %self.config.provider, "authorization code exchanged");
        Ok(tokens)
    }

    async fn fetch_identity(&self, tokens: &ProviderTokens) -> AuthResult<ProviderIdentity> {
        let resp = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("Userinfo request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AuthError::Provider(format!("Userinfo HTTP {status}")));
        }

        let raw = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AuthError::Provider(format!("Userinfo parse error: {e}")))?;
        let info: UserInfo = serde_json::from_value(raw.clone())
            .map_err(|e| AuthError::Provider(format!("Userinfo missing fields: {e}")))?;

        Ok(ProviderIdentity {
            provider_user_id: info.sub,
            email: info.email,
            email_verified: info.email_verified,
            name: info.name,
            picture: info.picture,
            raw,
        })
    }
}
