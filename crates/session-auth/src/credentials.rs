//! Access/refresh token pair

use common::Secret;
use serde::{Deserialize, Serialize};

/// The signed-in user's token pair.
///
/// Both halves are always replaced together: a `Credentials` value is the
/// only thing a `TokenStore` accepts, so an access token can never outlive
/// the refresh token it was issued with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Short-lived bearer credential attached to every protected request
    pub access_token: Secret<String>,
    /// Long-lived credential exchanged at `/auth/refresh`
    pub refresh_token: Secret<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
        }
    }
}

/// Token payload returned inside the `data` envelope by login and refresh.
#[derive(Deserialize, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

fn default_token_type() -> String {
    String::from("Bearer")
}

impl From<TokenGrant> for Credentials {
    fn from(grant: TokenGrant) -> Self {
        Self::new(grant.access_token, grant.refresh_token)
    }
}
