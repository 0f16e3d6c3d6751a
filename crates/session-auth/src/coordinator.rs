//! Single-flight session refresh
//!
//! Any number of requests may discover an expired access token at the same
//! moment. The backend rotates refresh tokens on use, so if each of them ran
//! its own refresh, every call after the first would present a token the first
//! one already burned. The coordinator makes sure they share one call.
//!
//! States:
//! - Idle → Refreshing: first `refresh()` installs a `PendingRefresh` and spawns
//!   the network call
//! - Refreshing: further `refresh()` calls join the same `PendingRefresh`
//! - Refreshing → Idle (success): store the new pair, resolve every waiter with it
//! - Refreshing → Idle (failure): clear the store, resolve every waiter with the
//!   failure; nothing is retried here
//!
//! The call runs on its own tokio task so a cancelled caller can't stall it,
//! and the pending slot is released by a drop guard so an error or panic in the
//! call can never leave later callers waiting on a dead refresh. Timeouts are
//! whatever the underlying HTTP client enforces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::error::Error;
use crate::store::TokenStore;
use crate::token::Refresher;

/// A refresh that did not produce new credentials.
///
/// `attempt` identifies the refresh run that failed; every waiter that joined
/// the same run sees the same number, which lets callers react once per
/// failed refresh rather than once per waiter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("session refresh #{attempt} failed: {error}")]
pub struct RefreshFailure {
    pub attempt: u64,
    #[source]
    pub error: Error,
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

type Outcome = std::result::Result<Credentials, RefreshFailure>;

/// The in-flight refresh every concurrent caller awaits.
#[derive(Clone)]
struct PendingRefresh {
    attempt: u64,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn Refresher>,
    pending: Mutex<Option<PendingRefresh>>,
    attempts: AtomicU64,
}

/// Fans concurrent refresh requests into one network call.
///
/// Cheap to clone; clones share the same pending slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                pending: Mutex::new(None),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a fresh token pair, joining an in-flight refresh if there is one.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn refresh(&self) -> Outcome {
        let pending = {
            let mut slot = self.inner.lock_slot();
            match slot.as_ref() {
                Some(pending) => {
                    debug!(attempt = pending.attempt, "joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.start();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.outcome.await
    }

    pub fn state(&self) -> RefreshState {
        if self.inner.lock_slot().is_some() {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    /// Number of refresh runs started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Spawn the refresh run. Caller holds the slot lock, so the run's guard
    /// can't release the slot before it has been installed.
    fn start(&self) -> PendingRefresh {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let _release = SlotGuard { inner: &inner };
            run_refresh(&inner, attempt).await
        });

        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(attempt, error = %e, "session refresh task aborted");
                    metrics::counter!("session_refresh_total", "outcome" => "aborted").increment(1);
                    Err(RefreshFailure {
                        attempt,
                        error: Error::Aborted(e.to_string()),
                    })
                }
            }
        }
        .boxed()
        .shared();

        PendingRefresh { attempt, outcome }
    }
}

impl Inner {
    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Empties the pending slot when the refresh run ends, however it ends.
struct SlotGuard<'a> {
    inner: &'a Inner,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.inner.lock_slot() = None;
    }
}

/// One refresh run: read the refresh token, call the endpoint, store or clear.
async fn run_refresh(inner: &Inner, attempt: u64) -> Outcome {
    let refresh_token = match inner.store.get().await {
        Some(current) if !current.refresh_token.expose().is_empty() => current.refresh_token,
        _ => {
            debug!(attempt, "no refresh token stored, skipping refresh call");
            metrics::counter!("session_refresh_total", "outcome" => "missing_token").increment(1);
            return Err(RefreshFailure {
                attempt,
                error: Error::MissingRefreshToken,
            });
        }
    };

    match inner.refresher.refresh(refresh_token.expose_str()).await {
        Ok(grant) => {
            let credentials = Credentials::from(grant);
            // The in-memory pair is replaced even when persisting fails, and the
            // old refresh token is already spent, so this still counts as success.
            if let Err(e) = inner.store.set(credentials.clone()).await {
                warn!(attempt, error = %e, "failed to persist refreshed session");
            }
            info!(attempt, "session refreshed");
            metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
            Ok(credentials)
        }
        Err(error) => {
            warn!(attempt, error = %error, "session refresh failed, clearing stored tokens");
            if let Err(e) = inner.store.clear().await {
                warn!(attempt, error = %e, "failed to clear session after refresh failure");
            }
            metrics::counter!("session_refresh_total", "outcome" => "failure").increment(1);
            Err(RefreshFailure { attempt, error })
        }
    }
}
