//! Session credentials and single-flight token refresh
//!
//! Holds the access/refresh token pair for one signed-in user and keeps it
//! fresh. The crate has no knowledge of the protected API surface; the
//! `api-client` crate drives it when a request comes back 401.
//!
//! Session flow:
//! 1. Login stores a `Credentials` pair via `TokenStore::set()`
//! 2. Requests read the pair via `TokenStore::get()` and send the access token
//! 3. On 401 the caller asks `RefreshCoordinator::refresh()` for a new pair
//! 4. The coordinator posts the refresh token to `/auth/refresh` once, no matter
//!    how many callers are waiting, and stores (or clears) the outcome

pub mod constants;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod store;
pub mod token;

pub use constants::*;
pub use coordinator::{RefreshCoordinator, RefreshFailure, RefreshState};
pub use credentials::{Credentials, TokenGrant};
pub use error::{Error, Result};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{HttpRefresher, Refresher, refresh_tokens};
