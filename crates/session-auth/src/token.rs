//! Refresh endpoint call
//!
//! `POST {base}/auth/refresh` with `{"refresh_token": "..."}`. The backend
//! answers `{"success": true, "data": {access_token, refresh_token, token_type}}`
//! on success; any non-2xx status means the refresh token is no longer usable.
//! Backends rotate refresh tokens on use, so the old one is dead after a
//! successful call.

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::constants::REFRESH_PATH;
use crate::credentials::TokenGrant;
use crate::error::{Error, Result};

/// Longest slice of an error body kept in `Error::Rejected`.
const MAX_BODY_IN_ERROR: usize = 512;

/// A missing `success` counts as true, same as for every other endpoint.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<TokenGrant>,
}

fn default_success() -> bool {
    true
}

/// Network side of a refresh, kept behind a trait so the coordinator can be
/// driven without sockets.
pub trait Refresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant>>;
}

/// Refresher that calls the backend's refresh endpoint over HTTP.
///
/// Timeouts come from the `reqwest::Client` it is built with.
#[derive(Clone)]
pub struct HttpRefresher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Refresher for HttpRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant>> {
        Box::pin(refresh_tokens(&self.client, &self.base_url, refresh_token))
    }
}

/// Exchange a refresh token for a new token pair.
pub async fn refresh_tokens(
    client: &reqwest::Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<TokenGrant> {
    let url = format!("{}{REFRESH_PATH}", base_url.trim_end_matches('/'));
    debug!(url = %url, "requesting token refresh");

    let response = client
        .post(&url)
        .json(&serde_json::json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        if body.len() > MAX_BODY_IN_ERROR {
            let mut cut = MAX_BODY_IN_ERROR;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let envelope = response
        .json::<Envelope>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("undecodable refresh response: {e}")))?;

    match envelope {
        Envelope {
            success: true,
            data: Some(grant),
        } => Ok(grant),
        Envelope { success: false, .. } => Err(Error::InvalidResponse(
            "refresh response reported success=false".into(),
        )),
        Envelope { data: None, .. } => {
            Err(Error::InvalidResponse("refresh response has no data".into()))
        }
    }
}
