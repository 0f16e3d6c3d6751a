//! Session-aware transport
//!
//! Wraps a `Transport` and owns the whole 401 story:
//!
//! 1. Attach the stored access token (if any) as a bearer credential
//! 2. Send
//! 3. On 401, for a request not yet retried: get a usable token (from a
//!    concurrent refresh that already landed, or via the `RefreshCoordinator`)
//!    and resend the original request once
//! 4. If no token can be had, fail with `SESSION_EXPIRED` and tell the
//!    embedding application through the session-expired hook
//! 5. Any other non-2xx is normalized and returned as the error
//!
//! A request is sent at most twice, and causes at most one refresh call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use common::Secret;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use session_auth::{
    Credentials, LOGIN_PATH, LOGOUT_PATH, RefreshCoordinator, RefreshFailure, TokenGrant,
    TokenStore,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::NormalizedError;
use crate::request::{ApiRequest, ApiResponse};
use crate::{Result, Transport};

/// Called with no arguments when the session can't be recovered. The
/// embedding application decides what that means (show sign-in, exit, ...).
pub type SessionExpiredHook = Arc<dyn Fn() + Send + Sync>;

/// Per-call retry state.
#[derive(Debug, Default)]
struct RequestAttempt {
    retried: bool,
}

/// Transport that manages the bearer session for every request it sends.
pub struct AuthenticatedTransport {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    coordinator: RefreshCoordinator,
    on_session_expired: Option<SessionExpiredHook>,
    /// Highest refresh attempt already reported through the hook
    reported_failure: AtomicU64,
    /// Last recovered token the backend still rejected, already reported
    reported_rejection: Mutex<Option<Secret<String>>>,
}

impl AuthenticatedTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            on_session_expired: None,
            reported_failure: AtomicU64::new(0),
            reported_rejection: Mutex::new(None),
        }
    }

    /// Install the hook invoked when the session is definitively gone.
    pub fn with_session_expired_hook(mut self, hook: SessionExpiredHook) -> Self {
        self.on_session_expired = Some(hook);
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send `request`; 2xx responses are returned unchanged, everything else
    /// becomes a `NormalizedError`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let span = info_span!(
            "api_request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.send_with_session(&request).instrument(span).await
    }

    /// Send and decode the envelope's `data` member.
    pub async fn send_data<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.data()
    }

    async fn send_with_session(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut attempt = RequestAttempt::default();
        let mut access = if request.authenticated {
            self.store.get().await.map(|c| c.access_token)
        } else {
            None
        };

        loop {
            let response = self
                .transport
                .execute(request, access.as_ref().map(Secret::expose_str))
                .await?;
            let status = response.status();
            metrics::counter!("api_requests_total", "status" => status.as_u16().to_string())
                .increment(1);

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && request.authenticated {
                if attempt.retried {
                    if let Some(rejected) = &access {
                        self.report_rejected_token(rejected);
                    }
                } else {
                    attempt.retried = true;
                    access = Some(self.recover_session(access.as_ref(), status).await?);
                    debug!("retrying request with recovered session");
                    continue;
                }
            }

            let error = NormalizedError::from_response(status, response.body());
            debug!(%status, code = error.code(), kind = ?error.kind(), "request failed");
            return Err(error);
        }
    }

    /// Produce an access token to retry with after a 401.
    ///
    /// `sent` is the token the failed request carried. If the store already
    /// holds a different one, a concurrent refresh has landed and we reuse
    /// it instead of burning the new refresh token.
    async fn recover_session(
        &self,
        sent: Option<&Secret<String>>,
        status: StatusCode,
    ) -> Result<Secret<String>> {
        match (sent, self.store.get().await) {
            (Some(_), None) => {
                // Someone else already failed the refresh (or logged out) and
                // reported it; don't start a new cycle or report again
                debug!("session was cleared while the request was in flight");
                return Err(NormalizedError::session_expired(status));
            }
            (sent, Some(current)) if sent != Some(&current.access_token) => {
                debug!("access token changed while the request was in flight");
                return Ok(current.access_token);
            }
            _ => {}
        }

        match self.coordinator.refresh().await {
            Ok(credentials) => Ok(credentials.access_token),
            Err(failure) => {
                self.report_refresh_failure(&failure);
                Err(NormalizedError::session_expired(status))
            }
        }
    }

    /// Fire the hook once per failed refresh run, however many requests
    /// were waiting on it.
    fn report_refresh_failure(&self, failure: &RefreshFailure) {
        let previous = self
            .reported_failure
            .fetch_max(failure.attempt, Ordering::SeqCst);
        if previous < failure.attempt {
            warn!(attempt = failure.attempt, error = %failure.error, "session expired");
            self.notify_session_expired();
        }
    }

    /// Fire the hook once per recovered token the backend still rejects, so
    /// requests that all retried with the same token report it together.
    fn report_rejected_token(&self, token: &Secret<String>) {
        let mut reported = self
            .reported_rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reported.as_ref() == Some(token) {
            return;
        }
        *reported = Some(token.clone());
        drop(reported);
        warn!("request rejected again after session recovery");
        self.notify_session_expired();
    }

    fn notify_session_expired(&self) {
        if let Some(hook) = &self.on_session_expired {
            hook();
        }
    }

    /// Sign in and store the issued token pair.
    ///
    /// A `STORAGE_ERROR` means the pair could not be persisted; the session
    /// is still live for this transport but will not survive a restart.
    ///
    /// Sent anonymously: a 401 here means bad credentials, not an expired session.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<()> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            serde_json::json!({ "email": email, "password": password.expose_str() }),
        )
        .anonymous();
        let grant: TokenGrant = self.send_data(request).await?;

        self.store
            .set(Credentials::from(grant))
            .await
            .map_err(|e| NormalizedError::storage(&e))?;
        info!("signed in");
        Ok(())
    }

    /// Revoke the session server-side and forget it locally.
    ///
    /// Local tokens are cleared even if the backend call fails, and a 401 here
    /// never starts a refresh.
    pub async fn logout(&self) -> Result<()> {
        let Some(current) = self.store.get().await else {
            debug!("logout requested with no stored session");
            return Ok(());
        };

        let request = ApiRequest::post(
            LOGOUT_PATH,
            serde_json::json!({ "refresh_token": current.refresh_token.expose_str() }),
        );
        match self
            .transport
            .execute(&request, Some(current.access_token.expose_str()))
            .await
        {
            Ok(response) if response.status().is_success() => debug!("session revoked"),
            Ok(response) => {
                warn!(status = %response.status(), "backend refused logout, clearing local session anyway");
            }
            Err(e) => warn!(error = %e, "logout request failed, clearing local session anyway"),
        }

        self.store
            .clear()
            .await
            .map_err(|e| NormalizedError::storage(&e))?;
        info!("signed out");
        Ok(())
    }
}
