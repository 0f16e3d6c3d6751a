//! Request and response values passed through the transports

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::NormalizedError;

/// An outgoing API call, relative to the configured base URL.
///
/// The transport may send the same request twice (before and after a
/// refresh); only the bearer credential differs between the two sends.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, e.g. `/admins`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Whether to attach the session's token and recover from 401
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method,
            path,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send without the session token and without 401 recovery
    /// (login, public storefront endpoints).
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// A received HTTP response, body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the whole body as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NormalizedError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| NormalizedError::invalid_response(self.status, e.to_string()))
    }

    /// Decode the `data` member of the backend envelope
    /// `{"success": true, "data": ...}` as `T`.
    ///
    /// An envelope that says `success: false` is normalized like an error
    /// response even though the status was 2xx. A missing `success` counts as
    /// true. `"data": null` is handed to `T`, so `()` and `Option<_>` accept it.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, NormalizedError> {
        let mut body: serde_json::Value = self.json()?;
        let success = body
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        if !success {
            return Err(NormalizedError::from_response(self.status, &self.body));
        }
        let data = body
            .as_object_mut()
            .and_then(|envelope| envelope.remove("data"))
            .ok_or_else(|| NormalizedError::invalid_response(self.status, "response has no data"))?;
        serde_json::from_value(data)
            .map_err(|e| NormalizedError::invalid_response(self.status, e.to_string()))
    }
}
