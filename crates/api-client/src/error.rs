//! Backend error normalization
//!
//! The backend reports failures in a few overlapping shapes:
//!
//! ```json
//! { "success": false,
//!   "error": { "code": "EMAIL_TAKEN", "message": "...", "field": "email" },
//!   "errors": [ { "field": "email", "message": "Email is required", "code": "required" } ],
//!   "details": { ... } }
//! ```
//!
//! Any of those keys may be missing, and some handlers send plain text or
//! nothing at all. `NormalizedError::from_response` folds all of it into one
//! value with a stable `code`, a human-readable `message` the UI can show
//! as-is, and the HTTP status exactly as the transport received it.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

/// Code used when the payload carries none.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// Message used when the payload carries none.
pub const GENERIC_MESSAGE: &str = "An error occurred";

/// Code for a 401 the session could not recover from.
pub const SESSION_EXPIRED_CODE: &str = "SESSION_EXPIRED";

/// Code for failures where no HTTP response arrived.
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

/// Code for a 2xx whose body could not be decoded.
pub const INVALID_RESPONSE_CODE: &str = "INVALID_RESPONSE";

/// Code for local token persistence failures.
pub const STORAGE_ERROR_CODE: &str = "STORAGE_ERROR";

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 401 that survived a refresh, or the refresh itself failed
    Authentication,
    /// Payload listed per-field problems in `errors[]`
    Validation,
    Conflict,
    NotFound,
    /// Any other status with a recognizable error payload
    Server,
    /// No HTTP response (connection refused, timeout)
    Network,
    /// Malformed or absent payload
    Unknown,
}

/// One entry of the backend's `errors[]` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
    pub code: Option<String>,
}

impl FieldError {
    fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        let message = entry.get("message").and_then(Value::as_str)?;
        Some(Self {
            field: string_field(entry, "field").filter(|f| !f.is_empty()),
            message: message.to_owned(),
            code: string_field(entry, "code"),
        })
    }

    fn render(&self) -> String {
        match &self.field {
            Some(field) => format!("{field}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// A failed API call, reduced to one uniform shape.
///
/// Built once from a response and never modified afterwards.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct NormalizedError {
    kind: ErrorKind,
    code: String,
    http_status: Option<u16>,
    message: String,
    field: Option<String>,
    field_errors: Vec<FieldError>,
    details: Option<Map<String, Value>>,
}

impl NormalizedError {
    /// Normalize a non-2xx response body. Never fails: anything unreadable
    /// degrades to `UNKNOWN_ERROR` / "An error occurred".
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let payload: Option<Value> = serde_json::from_slice(body).ok();
        let root = payload.as_ref().and_then(Value::as_object);
        let error_value = root.and_then(|r| r.get("error"));
        let error_obj = error_value.and_then(Value::as_object);

        let field_errors: Vec<FieldError> = root
            .and_then(|r| r.get("errors"))
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(FieldError::from_value).collect())
            .unwrap_or_default();

        // Some handlers send `"error": "text"` or a bare top-level message
        let top_message = error_obj
            .and_then(|e| string_field(e, "message"))
            .or_else(|| error_value.and_then(Value::as_str).map(str::to_owned))
            .or_else(|| root.and_then(|r| string_field(r, "message")));

        let message = if !field_errors.is_empty() {
            field_errors
                .iter()
                .map(FieldError::render)
                .collect::<Vec<_>>()
                .join(". ")
        } else {
            top_message
                .clone()
                .unwrap_or_else(|| GENERIC_MESSAGE.to_owned())
        };

        let kind = match status {
            StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
            _ if !field_errors.is_empty() => ErrorKind::Validation,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::CONFLICT => ErrorKind::Conflict,
            _ if error_obj.is_some() || top_message.is_some() => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };

        Self {
            kind,
            code: error_obj
                .and_then(|e| string_field(e, "code"))
                .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_owned()),
            http_status: Some(status.as_u16()),
            message,
            field: error_obj.and_then(|e| string_field(e, "field")),
            field_errors,
            details: root
                .and_then(|r| r.get("details"))
                .and_then(Value::as_object)
                .cloned(),
        }
    }

    /// The session is gone: refresh failed or nothing to refresh with.
    /// `status` is the 401 that started the recovery.
    pub fn session_expired(status: StatusCode) -> Self {
        Self::local(
            ErrorKind::Authentication,
            SESSION_EXPIRED_CODE,
            Some(status.as_u16()),
            "Your session has expired. Please sign in again.",
        )
    }

    /// No HTTP response was received.
    pub fn network(error: &reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            "The server took too long to respond"
        } else {
            "Unable to reach the server"
        };
        let mut normalized = Self::local(ErrorKind::Network, NETWORK_ERROR_CODE, None, message);
        normalized.details = Some(Map::from_iter([(
            "cause".to_owned(),
            Value::String(error.to_string()),
        )]));
        normalized
    }

    /// A success response whose body didn't have the expected shape.
    pub fn invalid_response(status: StatusCode, reason: impl Into<String>) -> Self {
        let mut normalized = Self::local(
            ErrorKind::Unknown,
            INVALID_RESPONSE_CODE,
            Some(status.as_u16()),
            "The server sent an unexpected response",
        );
        normalized.details = Some(Map::from_iter([(
            "cause".to_owned(),
            Value::String(reason.into()),
        )]));
        normalized
    }

    /// Token persistence failed locally.
    pub fn storage(error: &session_auth::Error) -> Self {
        let mut normalized = Self::local(
            ErrorKind::Unknown,
            STORAGE_ERROR_CODE,
            None,
            "Unable to save your session",
        );
        normalized.details = Some(Map::from_iter([(
            "cause".to_owned(),
            Value::String(error.to_string()),
        )]));
        normalized
    }

    fn local(kind: ErrorKind, code: &str, http_status: Option<u16>, message: &str) -> Self {
        Self {
            kind,
            code: code.to_owned(),
            http_status,
            message: message.to_owned(),
            field: None,
            field_errors: Vec::new(),
            details: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Status of the response this error came from; `None` when no response arrived.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn field_errors(&self) -> &[FieldError] {
        &self.field_errors
    }

    pub fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }

    pub fn is_authentication(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(status: u16, body: &str) -> NormalizedError {
        NormalizedError::from_response(StatusCode::from_u16(status).unwrap(), body.as_bytes())
    }

    #[test]
    fn field_errors_compose_the_message() {
        let err = normalize(
            422,
            r#"{"success":false,
                "error":{"code":"VALIDATION_ERROR","message":"Validation failed"},
                "errors":[
                    {"field":"email","message":"Email is required","code":"required"},
                    {"field":"password","message":"Too short","code":"min_length"}
                ]}"#,
        );
        assert_eq!(err.message(), "email: Email is required. password: Too short");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.field_errors().len(), 2);
        assert_eq!(err.field_errors()[1].field.as_deref(), Some("password"));
        assert_eq!(err.field_errors()[1].code.as_deref(), Some("min_length"));
    }

    #[test]
    fn field_error_without_field_is_bare_message() {
        let err = normalize(
            400,
            r#"{"errors":[{"message":"Cart is empty"},{"field":"zone","message":"Unknown zone"}]}"#,
        );
        assert_eq!(err.message(), "Cart is empty. zone: Unknown zone");
        assert_eq!(err.code(), UNKNOWN_ERROR_CODE);
    }

    #[test]
    fn top_level_message_used_verbatim() {
        let err = normalize(
            409,
            r#"{"success":false,"error":{"code":"SLUG_TAKEN","message":"Slug already exists","field":"slug"}}"#,
        );
        assert_eq!(err.message(), "Slug already exists");
        assert_eq!(err.code(), "SLUG_TAKEN");
        assert_eq!(err.field(), Some("slug"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.http_status(), Some(409));
    }

    #[test]
    fn empty_payload_falls_back() {
        for body in ["", "{}", "null", "<html>Bad Gateway</html>", "[1,2,3]"] {
            let err = normalize(502, body);
            assert_eq!(err.message(), GENERIC_MESSAGE, "body: {body}");
            assert_eq!(err.code(), UNKNOWN_ERROR_CODE, "body: {body}");
            assert_eq!(err.kind(), ErrorKind::Unknown, "body: {body}");
            assert_eq!(err.http_status(), Some(502));
        }
    }

    #[test]
    fn malformed_fields_degrade_instead_of_failing() {
        let err = normalize(
            500,
            r#"{"error":{"code":42,"message":["not","a","string"]},"errors":"nope","details":7}"#,
        );
        assert_eq!(err.message(), GENERIC_MESSAGE);
        assert_eq!(err.code(), UNKNOWN_ERROR_CODE);
        assert!(err.details().is_none());
        assert!(err.field_errors().is_empty());
    }

    #[test]
    fn non_object_entries_in_errors_are_skipped() {
        let err = normalize(
            422,
            r#"{"errors":["bad", 3, {"field":"name"}, {"field":"name","message":"Required"}]}"#,
        );
        assert_eq!(err.message(), "name: Required");
        assert_eq!(err.field_errors().len(), 1);
    }

    #[test]
    fn empty_errors_list_uses_top_level_message() {
        let err = normalize(
            400,
            r#"{"error":{"code":"BAD_REQUEST","message":"Invalid promo code"},"errors":[]}"#,
        );
        assert_eq!(err.message(), "Invalid promo code");
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[test]
    fn string_error_and_bare_message_are_accepted() {
        assert_eq!(normalize(500, r#"{"error":"Database down"}"#).message(), "Database down");
        assert_eq!(normalize(403, r#"{"message":"Forbidden"}"#).message(), "Forbidden");
    }

    #[test]
    fn status_drives_kind() {
        assert_eq!(normalize(401, "{}").kind(), ErrorKind::Authentication);
        assert_eq!(normalize(404, "").kind(), ErrorKind::NotFound);
        assert_eq!(normalize(409, "").kind(), ErrorKind::Conflict);
        assert_eq!(
            normalize(500, r#"{"error":{"message":"boom"}}"#).kind(),
            ErrorKind::Server
        );
        // Field errors outrank the status-based kinds except 401
        assert_eq!(
            normalize(409, r#"{"errors":[{"message":"x"}]}"#).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn blank_field_name_renders_bare_message() {
        let err = normalize(
            422,
            r#"{"errors":[{"field":"","message":"Bad"},{"field":"sku","message":"Taken"}]}"#,
        );
        assert_eq!(err.message(), "Bad. sku: Taken");
        assert_eq!(err.field_errors()[0].field, None);
    }

    #[test]
    fn details_are_kept() {
        let err = normalize(
            409,
            r#"{"error":{"message":"In use"},"details":{"product_ids":[1,2]}}"#,
        );
        let details = err.details().unwrap();
        assert_eq!(details["product_ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn session_expired_keeps_transport_status() {
        let err = NormalizedError::session_expired(StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.code(), SESSION_EXPIRED_CODE);
        assert_eq!(err.http_status(), Some(401));
    }

    #[test]
    fn display_is_the_human_message() {
        let err = normalize(404, r#"{"error":{"message":"Metal not found"}}"#);
        assert_eq!(err.to_string(), "Metal not found");
    }
}
