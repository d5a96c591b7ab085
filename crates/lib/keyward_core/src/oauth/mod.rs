//! Third-party login: PKCE helpers, the identity-provider client, stored
//! provider connections and the [`OAuthService`] that ties them together.

pub mod connections;
pub mod pkce;
pub mod provider;
pub mod service;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use connections::{
    ConnectedProvider, ConnectionRepository, ConnectionUpsert, OAuthConnection,
    PgConnectionRepository,
};
pub use provider::{GoogleProvider, IdentityProvider, ProviderIdentity, ProviderTokens};
pub use service::{
    AuthUrlRequest, AuthUrlResponse, CallbackOutcome, ExchangeCodeRequest, OAuthLogin,
    OAuthService, OneTimeCodeLogin,
};

/// Kind of client driving an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Browser; redirects back to a web origin.
    Web,
    /// Native app; redirect URIs must be on the allow-list.
    Mobile,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientType::Web => "web",
            ClientType::Mobile => "mobile",
        })
    }
}
