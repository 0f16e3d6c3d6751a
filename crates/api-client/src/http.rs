//! reqwest-backed transport
//!
//! Joins the request path onto the base URL, applies query, headers and JSON
//! body, and reads the full response body. Timeouts are configured on the
//! `reqwest::Client` passed in.

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::NormalizedError;
use crate::request::{ApiRequest, ApiResponse};
use crate::{Result, Transport};

/// Transport that talks to the backend over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ApiResponse>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), self.url(&request.path))
                .headers(request.headers.clone());
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await.map_err(|e| {
                warn!(error = %e, timeout = e.is_timeout(), "request failed before a response arrived");
                NormalizedError::network(&e)
            })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                warn!(error = %e, %status, "failed to read response body");
                NormalizedError::network(&e)
            })?;
            debug!(%status, bytes = body.len(), "response received");

            Ok(ApiResponse::new(status, headers, body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::Json;
    use axum::http::{HeaderMap, Method, Uri};
    use tokio::net::TcpListener;

    /// Mock backend that echoes method, path, query, authorization, and body.
    async fn start_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                |method: Method, uri: Uri, headers: HeaderMap, body: String| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    Json(serde_json::json!({
                        "method": method.as_str(),
                        "path": uri.path(),
                        "query": uri.query(),
                        "authorization": auth,
                        "body": body,
                    }))
                },
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn sends_method_path_query_and_bearer() {
        let base_url = start_echo_server().await;
        let transport = HttpTransport::new(reqwest::Client::new(), format!("{base_url}/api/v1/"));

        let request = ApiRequest::post("/promo-codes", serde_json::json!({"code": "GOLD10"}))
            .with_query("page", "2");
        let response = transport.execute(&request, Some("at_1")).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let echo: serde_json::Value = response.json().unwrap();
        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["path"], "/api/v1/promo-codes");
        assert_eq!(echo["query"], "page=2");
        assert_eq!(echo["authorization"], "Bearer at_1");
        let body: serde_json::Value =
            serde_json::from_str(echo["body"].as_str().unwrap()).unwrap();
        assert_eq!(body["code"], "GOLD10");
    }

    #[tokio::test]
    async fn omits_authorization_without_bearer() {
        let base_url = start_echo_server().await;
        let transport = HttpTransport::new(reqwest::Client::new(), base_url);

        let response = transport
            .execute(&ApiRequest::get("/slides"), None)
            .await
            .unwrap();
        let echo: serde_json::Value = response.json().unwrap();
        assert!(echo["authorization"].is_null());
        assert!(echo["query"].is_null());
    }

    #[tokio::test]
    async fn non_2xx_is_returned_not_raised() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                (axum::http::StatusCode::NOT_FOUND, r#"{"error":{"message":"nope"}}"#)
            });
            axum::serve(listener, app).await.unwrap();
        });
        let transport = HttpTransport::new(reqwest::Client::new(), format!("http://{addr}"));

        let response = transport
            .execute(&ApiRequest::get("/metals/99"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport = HttpTransport::new(reqwest::Client::new(), format!("http://{addr}"));

        let err = transport
            .execute(&ApiRequest::get("/admins"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.http_status(), None);
    }

    #[tokio::test]
    async fn timeout_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                "late"
            });
            axum::serve(listener, app).await.unwrap();
        });
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(100))
            .build()
            .unwrap();
        let transport = HttpTransport::new(client, format!("http://{addr}"));

        let err = transport
            .execute(&ApiRequest::get("/orders"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.message(), "The server took too long to respond");
    }
}
