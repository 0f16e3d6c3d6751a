//! Authenticated client for the storefront REST API
//!
//! Defines the `Transport` trait that separates "put bytes on the wire" from
//! session handling. `HttpTransport` is the reqwest implementation;
//! `AuthenticatedTransport` wraps any transport with bearer injection,
//! single-flight refresh on 401, one retry, and error normalization.

pub mod authenticated;
pub mod error;
pub mod http;
pub mod request;

pub use authenticated::{AuthenticatedTransport, SessionExpiredHook};
pub use error::{ErrorKind, FieldError, NormalizedError};
pub use http::HttpTransport;
pub use request::{ApiRequest, ApiResponse};

use futures_util::future::BoxFuture;

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, NormalizedError>;

/// Sends one request and returns whatever response came back.
///
/// Non-2xx statuses are *not* errors at this layer; only failures where no
/// response arrived are. Uses `BoxFuture` for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Send `request`, attaching `bearer` as `Authorization: Bearer <token>` when given.
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ApiResponse>>;
}
