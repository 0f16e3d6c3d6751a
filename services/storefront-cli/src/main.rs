//! Storefront admin CLI
//!
//! Single-binary operator tool that:
//! 1. Loads the API base URL and session file location from TOML
//! 2. Signs in and keeps the token pair in the session file
//! 3. Sends authenticated requests, refreshing the session on 401
//! 4. Prints the response `data` as pretty JSON

mod command;
mod config;
mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use api_client::{ApiRequest, ApiResponse, AuthenticatedTransport, HttpTransport, NormalizedError};
use clap::Parser as _;
use common::Secret;
use session_auth::{FileTokenStore, HttpRefresher, RefreshCoordinator};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::command::{Cli, Command};
use crate::config::Config;

const USER_AGENT: &str = concat!("storefront-admin/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean JSON output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    debug!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        token_file = %config.session.token_file.display(),
        "configuration loaded"
    );

    let transport = build_transport(&config).await?;

    match run(cli.command, &transport).await {
        Ok(Some(output)) => println!("{}", serde_json::to_string_pretty(&output)?),
        Ok(None) => {}
        Err(e) => match e.downcast_ref::<NormalizedError>() {
            Some(api_err) => {
                eprintln!("{}", describe(api_err));
                std::process::exit(1);
            }
            None => return Err(e),
        },
    }
    Ok(())
}

/// Human-readable report of a backend error: code and message, then one
/// line per rejected field.
fn describe(err: &NormalizedError) -> String {
    let mut out = match err.http_status() {
        Some(status) => format!("error {status} {}: {}", err.code(), err.message()),
        None => format!("error {}: {}", err.code(), err.message()),
    };
    for field_error in err.field_errors() {
        let field = field_error.field.as_deref().unwrap_or("-");
        out.push_str(&format!("\n  {field}: {}", field_error.message));
        if let Some(code) = &field_error.code {
            out.push_str(&format!(" ({code})"));
        }
    }
    out
}

/// Wire the session file, refresher, and HTTP transport together.
async fn build_transport(config: &Config) -> Result<AuthenticatedTransport> {
    let client = reqwest::Client::builder()
        .timeout(config.api.timeout())
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")?;

    let store = Arc::new(
        FileTokenStore::open(config.session.token_file.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to open session file {}",
                    config.session.token_file.display()
                )
            })?,
    );
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        Arc::new(HttpRefresher::new(client.clone(), &config.api.base_url)),
    );

    Ok(AuthenticatedTransport::new(
        Arc::new(HttpTransport::new(client, &config.api.base_url)),
        store,
        coordinator,
    )
    .with_session_expired_hook(Arc::new(|| {
        eprintln!("session expired; sign in again with `storefront-admin login <email>`");
    })))
}

/// Execute one command. Returns the JSON to print, if any.
async fn run(
    command: Command,
    transport: &AuthenticatedTransport,
) -> Result<Option<serde_json::Value>> {
    let request = match command {
        Command::Login { email } => {
            let password = std::env::var("STOREFRONT_PASSWORD")
                .map(Secret::new)
                .map_err(|_| error::Error::MissingPassword)?;
            debug!(email = %email, "signing in");
            transport.login(&email, &password).await?;
            return Ok(None);
        }
        Command::Logout => {
            transport.logout().await?;
            return Ok(None);
        }
        Command::Get { path } => ApiRequest::get(path),
        Command::Delete { path } => ApiRequest::delete(path),
        Command::Post { path, body } => ApiRequest::post(path, body),
        Command::Put { path, body } => ApiRequest::put(path, body),
        Command::Patch { path, body } => ApiRequest::patch(path, body),
    };

    let response = transport.send(request).await?;
    Ok(printable(&response))
}

/// The envelope's `data` when present, else the whole JSON body.
/// Empty or non-JSON bodies print nothing.
fn printable(response: &ApiResponse) -> Option<serde_json::Value> {
    let body: serde_json::Value = response.json().ok()?;
    match body {
        serde_json::Value::Object(mut map) if map.contains_key("data") => map.remove("data"),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    /// Serializes tests that read STOREFRONT_PASSWORD. Async because the
    /// variable is read inside `run`, so the guard spans an await.
    static ENV_MUTEX: Mutex<()> = Mutex::const_new(());

    /// Mock backend: login issues at_1/rt_1, /admins requires at_1.
    async fn start_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route(
                "/api/v1/auth/login",
                post(|| async {
                    Json(serde_json::json!({
                        "success": true,
                        "data": { "access_token": "at_1", "refresh_token": "rt_1", "token_type": "Bearer" }
                    }))
                }),
            )
            .route(
                "/api/v1/admins",
                get(|headers: HeaderMap| async move {
                    if headers.get("authorization").and_then(|v| v.to_str().ok())
                        != Some("Bearer at_1")
                    {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "error": { "message": "Token expired" } })),
                        )
                            .into_response();
                    }
                    Json(serde_json::json!({ "success": true, "data": [{ "id": 1, "name": "Owner" }] }))
                        .into_response()
                }),
            )
            .route(
                "/api/v1/health",
                get(|| async { Json(serde_json::json!({ "status": "ok" })) }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/v1")
    }

    fn test_config(base_url: &str, dir: &tempfile::TempDir) -> Config {
        Config {
            api: config::ApiConfig {
                base_url: base_url.to_owned(),
                timeout_secs: 5,
            },
            session: config::SessionConfig {
                token_file: dir.path().join("session.json"),
            },
        }
    }

    #[tokio::test]
    async fn login_then_get_prints_data() {
        let base_url = start_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&base_url, &dir);

        {
            let _lock = ENV_MUTEX.lock().await;
            // SAFETY: ENV_MUTEX is held
            unsafe { std::env::set_var("STOREFRONT_PASSWORD", "hunter2") };
            let transport = build_transport(&config).await.unwrap();
            let printed = run(
                Command::Login {
                    email: "owner@shop.test".into(),
                },
                &transport,
            )
            .await
            .unwrap();
            unsafe { std::env::remove_var("STOREFRONT_PASSWORD") };
            assert!(printed.is_none());
        }
        assert!(config.session.token_file.exists(), "session persisted");

        // A fresh process picks the session up from disk
        let transport = build_transport(&config).await.unwrap();
        let printed = run(
            Command::Get {
                path: "/admins".into(),
            },
            &transport,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(printed, serde_json::json!([{ "id": 1, "name": "Owner" }]));
    }

    #[tokio::test]
    async fn unenveloped_body_prints_whole() {
        let base_url = start_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let transport = build_transport(&test_config(&base_url, &dir)).await.unwrap();

        let printed = run(
            Command::Get {
                path: "/health".into(),
            },
            &transport,
        )
        .await
        .unwrap();
        assert_eq!(printed, Some(serde_json::json!({ "status": "ok" })));
    }

    #[tokio::test]
    async fn signed_out_request_reports_expired_session() {
        let base_url = start_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let transport = build_transport(&test_config(&base_url, &dir)).await.unwrap();

        let err = run(
            Command::Get {
                path: "/admins".into(),
            },
            &transport,
        )
        .await
        .unwrap_err();
        let api_err = err.downcast_ref::<api_client::NormalizedError>().unwrap();
        assert_eq!(api_err.code(), "SESSION_EXPIRED");
    }

    #[test]
    fn describe_lists_field_errors() {
        let body = br#"{"success":false,"error":{"code":"VALIDATION_ERROR","message":"Invalid input"},"errors":[{"field":"email","message":"Email is required","code":"REQUIRED"},{"field":"password","message":"Too short"}]}"#;
        let err = NormalizedError::from_response(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(
            describe(&err),
            "error 422 VALIDATION_ERROR: email: Email is required. password: Too short\n  email: Email is required (REQUIRED)\n  password: Too short"
        );
    }

    #[tokio::test]
    async fn login_without_password_env_fails_before_sending() {
        let _lock = ENV_MUTEX.lock().await;
        // SAFETY: ENV_MUTEX is held
        unsafe { std::env::remove_var("STOREFRONT_PASSWORD") };
        let dir = tempfile::tempdir().unwrap();
        let transport = build_transport(&test_config("http://127.0.0.1:9", &dir))
            .await
            .unwrap();

        let err = run(
            Command::Login {
                email: "owner@shop.test".into(),
            },
            &transport,
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<error::Error>().is_some(), "got: {err}");
    }
}
