//! Backend auth endpoints and persistence keys
//!
//! Paths are relative to the configured API base URL
//! (e.g. `https://api.example.com/api/v1`).

/// Exchanges a refresh token for a new access/refresh pair.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Exchanges email + password for a new access/refresh pair.
pub const LOGIN_PATH: &str = "/auth/login";

/// Revokes the current refresh token server-side.
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Persistence key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Persistence key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
