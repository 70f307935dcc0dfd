//! Response translation: raw passthrough, JSON, or a named custom decoder.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::request::Headers;
use crate::transport::RawResponse;

/// How a response body should be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ResponseType {
    #[default]
    Json,
    Raw,
    /// A decoder registered under this (case-insensitive) name.
    Custom(String),
}

impl FromStr for ResponseType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Ok(match name.as_str() {
            "json" | "" => ResponseType::Json,
            "raw" => ResponseType::Raw,
            _ => ResponseType::Custom(name),
        })
    }
}

impl From<&str> for ResponseType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(ty) => ty,
            Err(never) => match never {},
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Raw(Bytes),
    Text(String),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Json(_) => &[],
            Body::Raw(bytes) => bytes,
            Body::Text(text) => text.as_bytes(),
        }
    }
}

/// Integration-supplied body decoder.
pub type Decoder = Arc<dyn Fn(&[u8]) -> Result<Body> + Send + Sync>;

/// Registry of custom decoders keyed by lower-case type name.
#[derive(Clone, Default)]
pub struct Decoders(HashMap<String, Decoder>);

impl fmt::Debug for Decoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.0.keys().collect();
        names.sort();
        f.debug_tuple("Decoders").field(&names).finish()
    }
}

impl Decoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, decoder: F)
    where
        F: Fn(&[u8]) -> Result<Body> + Send + Sync + 'static,
    {
        self.0.insert(name.to_ascii_lowercase(), Arc::new(decoder));
    }

    pub fn get(&self, name: &str) -> Option<&Decoder> {
        self.0.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Fail early when `response_type` has no decoder.
pub fn ensure_supported(response_type: &ResponseType, decoders: &Decoders) -> Result<()> {
    match response_type {
        ResponseType::Custom(name) if !decoders.contains(name) => Err(Error::new(
            ErrorKind::UnsupportedResponseType(name.clone()),
        )),
        _ => Ok(()),
    }
}

/// Decode `body` as `response_type`.
///
/// Malformed JSON decodes to `Value::Null` rather than failing.
pub fn translate(body: &Bytes, response_type: &ResponseType, decoders: &Decoders) -> Result<Body> {
    match response_type {
        ResponseType::Raw => Ok(Body::Raw(body.clone())),
        ResponseType::Json => Ok(Body::Json(decode_json(body))),
        ResponseType::Custom(name) => {
            let decoder = decoders.get(name).ok_or_else(|| {
                Error::new(ErrorKind::UnsupportedResponseType(name.clone()))
            })?;
            decoder(body)
        }
    }
}

fn decode_json(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!(error = %e, len = body.len(), "Response body is not valid JSON");
        Value::Null
    })
}

/// A response the engine stopped retrying on (status 400 or above).
#[derive(Clone, PartialEq)]
pub struct ApiFailure {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Debug for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiFailure")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &sanitize_error_message(&self.text()))
            .finish()
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.text();
        if text.trim().is_empty() {
            write!(f, "API request failed with status {}", self.status)
        } else {
            write!(
                f,
                "API request failed with status {}: {}",
                self.status,
                sanitize_error_message(&text)
            )
        }
    }
}

impl std::error::Error for ApiFailure {}

impl From<RawResponse> for ApiFailure {
    fn from(response: RawResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

impl ApiFailure {
    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome of a dispatched request: decoded body or the failing response.
pub type ApiResult = std::result::Result<Body, ApiFailure>;

/// Redact bearer tokens from text that may end up in logs or errors and
/// truncate overly long bodies.
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LENGTH: usize = 500;

    let bearer = regex_lite::Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*")
        .expect("static regex is valid");
    let token_field = regex_lite::Regex::new(r#""(access_token|refresh_token)"\s*:\s*"[^"]*""#)
        .expect("static regex is valid");

    let mut sanitized = bearer
        .replace_all(message, "Bearer [REDACTED]")
        .to_string();
    sanitized = token_field
        .replace_all(&sanitized, "\"$1\":\"[REDACTED]\"")
        .to_string();

    if sanitized.len() > MAX_LENGTH {
        let mut cut = MAX_LENGTH;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...[truncated]");
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_type_parsing() {
        assert_eq!(ResponseType::from("JSON"), ResponseType::Json);
        assert_eq!(ResponseType::from("Raw"), ResponseType::Raw);
        assert_eq!(
            ResponseType::from("Csv"),
            ResponseType::Custom("csv".to_string())
        );
    }

    #[test]
    fn test_translate_json_and_raw() {
        let body = Bytes::from_static(br#"{"items":[1,2]}"#);
        let decoders = Decoders::new();

        let json = translate(&body, &ResponseType::Json, &decoders).unwrap();
        assert_eq!(json, Body::Json(json!({"items": [1, 2]})));

        let raw = translate(&body, &ResponseType::Raw, &decoders).unwrap();
        assert_eq!(raw.as_bytes(), &body[..]);
    }

    #[test]
    fn test_malformed_json_is_null() {
        let body = Bytes::from_static(b"{not json");
        let decoded = translate(&body, &ResponseType::Json, &Decoders::new()).unwrap();
        assert_eq!(decoded, Body::Json(Value::Null));
    }

    #[test]
    fn test_custom_decoder() {
        let mut decoders = Decoders::new();
        decoders.register("Upper", |body| {
            Ok(Body::Text(String::from_utf8_lossy(body).to_uppercase()))
        });

        let decoded = translate(
            &Bytes::from_static(b"abc"),
            &ResponseType::from("upper"),
            &decoders,
        )
        .unwrap();
        assert_eq!(decoded, Body::Text("ABC".to_string()));
    }

    #[test]
    fn test_unknown_custom_type() {
        let ty = ResponseType::from("xml");
        let err = ensure_supported(&ty, &Decoders::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedResponseType(ref n) if n == "xml"));

        let err = translate(&Bytes::new(), &ty, &Decoders::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedResponseType(_)));
    }

    #[test]
    fn test_api_failure_helpers() {
        let failure = ApiFailure::from(RawResponse::new(
            403,
            r#"{"error":"forbidden","access_token":"leaked"}"#,
        ));

        assert_eq!(failure.json().unwrap()["error"], "forbidden");
        let display = failure.to_string();
        assert!(display.contains("403"));
        assert!(!display.contains("leaked"));
    }

    #[test]
    fn test_sanitize_redacts_bearer_tokens() {
        let sanitized = sanitize_error_message("header was Bearer eyJhbGciOi.payload.sig");
        assert_eq!(sanitized, "header was Bearer [REDACTED]");
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let long_msg = "x".repeat(1000);
        let sanitized = sanitize_error_message(&long_msg);
        assert!(sanitized.len() < 600);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_passes_through_clean_messages() {
        let msg = "Account not found";
        assert_eq!(sanitize_error_message(msg), msg);
    }
}
