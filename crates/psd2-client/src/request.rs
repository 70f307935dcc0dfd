//! Request composition: method validation, header layering, endpoint
//! resolution, body serialization and query merging.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::error::{Error, ErrorKind, Result};
use crate::response::ResponseType;

/// Name of the header carrying credentials.
pub const AUTHORIZATION: &str = "Authorization";

/// Name of the content type header.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Content type of form-encoded bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    Head,
    Options,
    Patch,
    Put,
}

impl Method {
    /// Every method the client accepts, in the order they are reported.
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Post,
        Method::Delete,
        Method::Head,
        Method::Options,
        Method::Patch,
        Method::Put,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
        }
    }

    /// Methods whose parameters travel in the request body.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    /// Convert to reqwest::Method.
    pub fn to_reqwest(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidMethod {
                    method: s.to_string(),
                    allowed: Method::ALL
                        .iter()
                        .map(Method::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive names.
///
/// The `Authorization` value is redacted in Debug output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(name, value)| {
                if name.eq_ignore_ascii_case(AUTHORIZATION) && !value.is_empty() {
                    (name.as_str(), "[REDACTED]")
                } else {
                    (name.as_str(), value.as_str())
                }
            }))
            .finish()
    }
}

impl Headers {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a header, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a header. Replacement keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => *slot = (name, value),
            None => self.0.push((name, value)),
        }
    }

    /// Get a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(index).1)
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer `overrides` on top of `self`.
    pub fn merged(&self, overrides: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.insert(name, value);
        }
        merged
    }

    /// True when the `Authorization` header is absent or empty.
    pub fn authorization_missing(&self) -> bool {
        self.get(AUTHORIZATION).is_none_or(str::is_empty)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Request parameters: a mapping, a raw body string, or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Parameters {
    #[default]
    None,
    Map(Map<String, Value>),
    Raw(String),
}

impl Parameters {
    pub fn is_empty(&self) -> bool {
        match self {
            Parameters::None => true,
            Parameters::Map(map) => map.is_empty(),
            Parameters::Raw(raw) => raw.is_empty(),
        }
    }
}

impl TryFrom<Value> for Parameters {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Parameters::None),
            Value::Object(map) => Ok(Parameters::Map(map)),
            Value::String(raw) => Ok(Parameters::Raw(raw)),
            other => Err(Error::new(ErrorKind::InvalidParameters(format!(
                "parameters sent with the request have to be a mapping, a string or null, got {}",
                json_type_name(&other)
            )))),
        }
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Parameters::Map(map)
    }
}

impl From<String> for Parameters {
    fn from(raw: String) -> Self {
        Parameters::Raw(raw)
    }
}

impl From<&str> for Parameters {
    fn from(raw: &str) -> Self {
        Parameters::Raw(raw.to_string())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// Arguments of one logical API call.
///
/// The client keeps the call around for the whole retry loop and rebuilds the
/// wire request from it on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub endpoint: String,
    pub parameters: Parameters,
    pub headers: Headers,
    pub response_type: ResponseType,
}

impl ApiCall {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            parameters: Parameters::None,
            headers: Headers::new(),
            response_type: ResponseType::Json,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Put, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    pub fn with_parameters(mut self, parameters: impl Into<Parameters>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_response_type(mut self, response_type: impl Into<ResponseType>) -> Self {
        self.response_type = response_type.into();
        self
    }
}

/// A fully-formed request ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

/// Builder that layers headers and serializes parameters into a [`PendingRequest`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: Headers,
    parameters: Parameters,
}

impl RequestBuilder {
    /// Start a request. `endpoint` is resolved against `current_endpoint`
    /// unless it already carries a scheme.
    pub fn new(method: Method, endpoint: &str, current_endpoint: Option<&str>) -> Self {
        Self {
            method,
            url: resolve_endpoint(endpoint, current_endpoint),
            headers: Headers::new(),
            parameters: Parameters::None,
        }
    }

    /// Layer default headers, then per-call headers on top.
    pub fn headers(mut self, defaults: &Headers, per_call: &Headers) -> Self {
        self.headers = self.headers.merged(defaults).merged(per_call);
        self
    }

    /// Set the parameters.
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// True when no layer supplied a non-empty `Authorization` header.
    pub fn needs_authorization(&self) -> bool {
        self.headers.authorization_missing()
    }

    /// Inject the `Authorization` header if no layer supplied one.
    pub fn authorize(mut self, value: impl Into<String>) -> Self {
        if self.needs_authorization() {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serialize the parameters and produce the request.
    pub fn build(self) -> Result<PendingRequest> {
        let Self {
            method,
            mut url,
            mut headers,
            parameters,
        } = self;

        let body = match parameters {
            Parameters::None => None,
            Parameters::Raw(raw) => Some(Bytes::from(raw)),
            Parameters::Map(map) if method.carries_body() => {
                if is_json_content_type(headers.get(CONTENT_TYPE)) {
                    Some(Bytes::from(serde_json::to_vec(&map)?))
                } else {
                    if headers.get(CONTENT_TYPE).is_none() {
                        headers.insert(CONTENT_TYPE, FORM_CONTENT_TYPE);
                    }
                    Some(Bytes::from(serde_urlencoded::to_string(stringify_pairs(&map))?))
                }
            }
            Parameters::Map(map) => {
                if !map.is_empty() {
                    url = merge_query(&url, &map);
                }
                None
            }
        };

        Ok(PendingRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// True when the media type (ignoring parameters and case) is `application/json`.
fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

/// True when `url` starts with `scheme://`.
pub fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Join a relative endpoint onto the current endpoint.
pub fn resolve_endpoint(endpoint: &str, current_endpoint: Option<&str>) -> String {
    match current_endpoint {
        Some(base) if !base.is_empty() && !has_scheme(endpoint) => {
            if endpoint.is_empty() {
                base.to_string()
            } else {
                format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    endpoint.trim_start_matches('/')
                )
            }
        }
        _ => endpoint.to_string(),
    }
}

/// Overlay `parameters` on the query string of `url`.
///
/// Existing keys keep their position and take the new value, new keys are
/// appended, and the fragment is preserved. Merging an empty map yields the
/// normalized form of `url`.
pub fn merge_query(url: &str, parameters: &Map<String, Value>) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (without_fragment, None),
    };

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut overlay = |key: String, value: String| {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    };

    if let Some(query) = query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()).into_owned() {
            overlay(key, value);
        }
    }
    for (key, value) in stringify_pairs(parameters) {
        overlay(key, value);
    }

    let mut merged = base.to_string();
    if !pairs.is_empty() {
        merged.push('?');
        merged.push_str(
            &form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&pairs)
                .finish(),
        );
    }
    if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

/// Flatten parameters into key/value pairs. Nested arrays and objects use
/// bracketed keys: `{"a": [1, 2]}` becomes `a[0]=1&a[1]=2`.
fn stringify_pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        flatten_into(key.clone(), value, &mut pairs);
    }
    pairs
}

fn flatten_into(key: String, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(format!("{key}[{index}]"), item, pairs);
            }
        }
        Value::Object(fields) => {
            for (name, field) in fields {
                flatten_into(format!("{key}[{name}]"), field, pairs);
            }
        }
        Value::Null => pairs.push((key, String::new())),
        Value::String(s) => pairs.push((key, s.clone())),
        Value::Bool(b) => pairs.push((key, b.to_string())),
        Value::Number(n) => pairs.push((key, n.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_method_normalization() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!(" Patch ".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
    }

    #[test]
    fn test_invalid_method_names_allowed_set() {
        let err = "FETCH".parse::<Method>().unwrap_err();
        match err.kind {
            ErrorKind::InvalidMethod { method, allowed } => {
                assert_eq!(method, "FETCH");
                assert_eq!(allowed, "GET, POST, DELETE, HEAD, OPTIONS, PATCH, PUT");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn test_headers_case_insensitive_override() {
        let defaults = Headers::new()
            .with("Accept", "application/json")
            .with("Content-Type", "application/x-www-form-urlencoded");
        let per_call = Headers::new().with("content-type", "application/json");

        let merged = defaults.merged(&per_call);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(merged.get("accept"), Some("application/json"));
    }

    #[test]
    fn test_headers_debug_redacts_authorization() {
        let headers = Headers::new().with("Authorization", "Bearer secret-token");
        let debug = format!("{headers:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_authorization_injected_only_when_missing_or_empty() {
        let defaults = Headers::new().with("Authorization", "");
        let req = RequestBuilder::new(Method::Get, "https://x/y", None)
            .headers(&defaults, &Headers::new());
        assert!(req.needs_authorization());
        let req = req.authorize("Bearer abc").build().unwrap();
        assert_eq!(req.headers.get("Authorization"), Some("Bearer abc"));

        let per_call = Headers::new().with("authorization", "Basic xyz");
        let req = RequestBuilder::new(Method::Get, "https://x/y", None)
            .headers(&defaults, &per_call)
            .authorize("Bearer abc")
            .build()
            .unwrap();
        assert_eq!(req.headers.get("Authorization"), Some("Basic xyz"));
    }

    #[test]
    fn test_resolve_endpoint() {
        let base = Some("https://api.bank.example/bank/api/v1/");
        assert_eq!(
            resolve_endpoint("Accounts", base),
            "https://api.bank.example/bank/api/v1/Accounts"
        );
        assert_eq!(
            resolve_endpoint("/Accounts", base),
            "https://api.bank.example/bank/api/v1/Accounts"
        );
        assert_eq!(
            resolve_endpoint("https://other.example/x", base),
            "https://other.example/x"
        );
        assert_eq!(resolve_endpoint("Accounts", None), "Accounts");
        assert_eq!(resolve_endpoint("Accounts", Some("")), "Accounts");
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("https://x"));
        assert!(has_scheme("svn+ssh://x"));
        assert!(!has_scheme("/path?redirect=https://x"));
        assert!(!has_scheme("Accounts"));
    }

    #[test]
    fn test_merge_query_idempotent() {
        assert_eq!(merge_query("https://x/y?z=1", &Map::new()), "https://x/y?z=1");
        assert_eq!(merge_query("https://x/y", &Map::new()), "https://x/y");
    }

    #[test]
    fn test_merge_query_new_values_win() {
        assert_eq!(
            merge_query("https://x/y?a=1", &map(json!({"a": 2}))),
            "https://x/y?a=2"
        );
    }

    #[test]
    fn test_merge_query_keeps_order_and_fragment() {
        let merged = merge_query(
            "https://x/y?b=1&a=1#section",
            &map(json!({"a": "two words", "c": true})),
        );
        assert_eq!(merged, "https://x/y?b=1&a=two+words&c=true#section");
    }

    #[test]
    fn test_merge_query_drops_empty_markers() {
        assert_eq!(merge_query("https://x/y?#", &Map::new()), "https://x/y");
    }

    #[test]
    fn test_get_folds_parameters_into_query() {
        let req = RequestBuilder::new(Method::Get, "Transactions/1?index=0", Some("https://b/"))
            .parameters(Parameters::Map(map(json!({"length": 100, "index": 5}))))
            .build()
            .unwrap();

        assert_eq!(req.url, "https://b/Transactions/1?index=5&length=100");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_post_json_body() {
        let headers = Headers::new().with("Content-Type", "application/json; charset=utf-8");
        let req = RequestBuilder::new(Method::Post, "https://b/Transfers", None)
            .headers(&Headers::new(), &headers)
            .parameters(Parameters::Map(map(json!({"amount": 10.5}))))
            .build()
            .unwrap();

        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"amount": 10.5}));
    }

    #[test]
    fn test_post_form_body() {
        let req = RequestBuilder::new(Method::Post, "https://b/connect/token", None)
            .parameters(Parameters::Map(map(json!({"grant_type": "client_credentials"}))))
            .build()
            .unwrap();

        assert_eq!(req.body.as_deref(), Some(&b"grant_type=client_credentials"[..]));
        assert_eq!(
            req.headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_nested_form_values_use_bracketed_keys() {
        let req = RequestBuilder::new(Method::Post, "https://b/x", None)
            .parameters(Parameters::Map(map(json!({
                "a": [1, 2],
                "b": {"c": "d"}
            }))))
            .build()
            .unwrap();

        assert_eq!(
            req.body.as_deref(),
            Some(&b"a%5B0%5D=1&a%5B1%5D=2&b%5Bc%5D=d"[..])
        );
    }

    #[test]
    fn test_nested_query_values_use_bracketed_keys() {
        assert_eq!(
            merge_query("https://x/y?ids%5B0%5D=9", &map(json!({"ids": ["a", "b"]}))),
            "https://x/y?ids%5B0%5D=a&ids%5B1%5D=b"
        );
    }

    #[test]
    fn test_raw_body_verbatim() {
        let req = RequestBuilder::new(Method::Put, "https://b/x", None)
            .parameters(Parameters::from("<xml/>"))
            .build()
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"<xml/>"[..]));
        assert!(req.headers.get("content-type").is_none());
    }

    #[test]
    fn test_parameters_from_value() {
        assert_eq!(Parameters::try_from(Value::Null).unwrap(), Parameters::None);
        assert_eq!(
            Parameters::try_from(json!("raw")).unwrap(),
            Parameters::Raw("raw".into())
        );
        assert!(matches!(
            Parameters::try_from(json!({"a": 1})).unwrap(),
            Parameters::Map(_)
        ));

        let err = Parameters::try_from(json!([1, 2])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidParameters(_)));
        let err = Parameters::try_from(json!(42)).unwrap_err();
        assert!(err.to_string().contains("a number"));
    }
}
