//! Transport boundary: send one request, get one response.
//!
//! The engine only needs [`Transport::send`]. A response with any status is an
//! `Ok(RawResponse)`; only faults that produced no response (connection,
//! timeout, redirect policy violations) are errors.
//!
//! [`ReqwestTransport`] is the default implementation. It disables reqwest's
//! own redirect handling and follows redirects itself so that the redirect
//! settings from [`Config`](crate::Config) apply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use tracing::{debug, info};
use url::Url;

use crate::config::RedirectCallback;
use crate::error::{Error, ErrorKind, Result};
use crate::request::{Headers, Method, PendingRequest, AUTHORIZATION, CONTENT_TYPE};

/// Sends a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    async fn send(&self, request: PendingRequest) -> Result<RawResponse>;
}

/// Response header listing the redirect targets, when tracking is enabled.
pub const REDIRECT_HISTORY_HEADER: &str = "X-Redirect-History";

/// Response header listing the redirect status codes, when tracking is enabled.
pub const REDIRECT_STATUS_HISTORY_HEADER: &str = "X-Redirect-Status-History";

/// Redirects followed for one response, in hop order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects {
    pub urls: Vec<String>,
    pub statuses: Vec<u16>,
}

impl Redirects {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }
}

/// Response as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    /// URLs visited through redirects, when tracking is enabled.
    pub redirect_history: Vec<String>,
    /// Status codes of the redirects, when tracking is enabled.
    pub redirect_status_history: Vec<u16>,
}

impl RawResponse {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
            redirect_history: Vec::new(),
            redirect_status_history: Vec::new(),
        }
    }

    /// Add a header, builder style.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Redirects recorded for this response.
    pub fn redirects(&self) -> Redirects {
        Redirects {
            urls: self.redirect_history.clone(),
            statuses: self.redirect_status_history.clone(),
        }
    }

    /// Returns true if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the status is 4xx or 5xx.
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// A redirect about to be followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEvent {
    pub status: u16,
    pub from: String,
    pub to: String,
    /// Method the redirected request will use.
    pub method: Method,
}

/// Configuration the default transport is built from.
#[derive(Clone)]
pub struct TransportSettings {
    pub max_redirects: usize,
    pub strict_redirects: bool,
    pub referer_on_redirect: bool,
    pub allowed_protocols: Vec<String>,
    pub on_redirect_callback: Option<RedirectCallback>,
    pub track_redirects: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("max_redirects", &self.max_redirects)
            .field("strict_redirects", &self.strict_redirects)
            .field("referer_on_redirect", &self.referer_on_redirect)
            .field("allowed_protocols", &self.allowed_protocols)
            .field(
                "on_redirect_callback",
                &self.on_redirect_callback.as_ref().map(|_| "<callback>"),
            )
            .field("track_redirects", &self.track_redirects)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl PartialEq for TransportSettings {
    fn eq(&self, other: &Self) -> bool {
        let callbacks_match = match (&self.on_redirect_callback, &other.on_redirect_callback) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };

        callbacks_match
            && self.max_redirects == other.max_redirects
            && self.strict_redirects == other.strict_redirects
            && self.referer_on_redirect == other.referer_on_redirect
            && self.allowed_protocols == other.allowed_protocols
            && self.track_redirects == other.track_redirects
            && self.timeout == other.timeout
            && self.connect_timeout == other.connect_timeout
            && self.user_agent == other.user_agent
    }
}

/// Default transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    settings: TransportSettings,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Build the underlying HTTP client.
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(&settings.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                Error::with_source(
                    ErrorKind::Config(format!("HTTP client initialization failed: {e}")),
                    e,
                )
            })?;

        Ok(Self { inner, settings })
    }

    /// Settings this transport was built with.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        headers: &Headers,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .inner
            .request(method.to_reqwest(), url.clone())
            .headers(to_header_map(headers)?);

        if let Some(body) = body {
            req = req.body(body);
        }

        debug!(method = %method, url = %url, "Sending request");
        Ok(req.send().await?)
    }

    /// Compute the follow-up request for a redirect response.
    fn next_hop(
        &self,
        status: u16,
        location: &str,
        current: &Url,
        method: Method,
        headers: &mut Headers,
    ) -> Result<(Url, Method, bool)> {
        let next = current.join(location)?;

        let scheme = next.scheme();
        if !self
            .settings
            .allowed_protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(scheme))
        {
            return Err(Error::new(ErrorKind::RedirectProtocol(format!(
                "'{scheme}' is not one of the allowed protocols ({})",
                self.settings.allowed_protocols.join(", ")
            ))));
        }

        let downgrade_to_get =
            status == 303 || (matches!(status, 301 | 302) && !self.settings.strict_redirects);
        let (next_method, keep_body) = if downgrade_to_get && method != Method::Head {
            (Method::Get, false)
        } else {
            (method, true)
        };
        if !keep_body {
            headers.remove(CONTENT_TYPE);
        }

        let https_to_http = current.scheme() == "https" && next.scheme() == "http";
        if self.settings.referer_on_redirect && !https_to_http {
            let mut referer = current.clone();
            referer.set_fragment(None);
            let _ = referer.set_username("");
            let _ = referer.set_password(None);
            headers.insert("Referer", referer.as_str());
        } else {
            headers.remove("Referer");
        }

        if next.host_str() != current.host_str() {
            headers.remove(AUTHORIZATION);
        }

        Ok((next, next_method, keep_body))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PendingRequest) -> Result<RawResponse> {
        let PendingRequest {
            mut method,
            url,
            mut headers,
            mut body,
        } = request;

        let mut url = Url::parse(&url)?;
        let mut history = Vec::new();
        let mut status_history = Vec::new();

        loop {
            let response = self.send_once(method, &url, &headers, body.clone()).await?;
            let status = response.status().as_u16();

            let location = response
                .status()
                .is_redirection()
                .then(|| response.headers().get(LOCATION))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if let Some(location) = location {
                if history.len() >= self.settings.max_redirects {
                    return Err(Error::new(ErrorKind::TooManyRedirects {
                        max: self.settings.max_redirects,
                    }));
                }

                let (next, next_method, keep_body) =
                    self.next_hop(status, &location, &url, method, &mut headers)?;

                if let Some(ref callback) = self.settings.on_redirect_callback {
                    callback(&RedirectEvent {
                        status,
                        from: url.to_string(),
                        to: next.to_string(),
                        method: next_method,
                    });
                }

                debug!(status, from = %url, to = %next, "Following redirect");
                history.push(next.to_string());
                status_history.push(status);

                if !keep_body {
                    body = None;
                }
                method = next_method;
                url = next;
                continue;
            }

            let mut response_headers = from_header_map(response.headers());
            let content_length = response.content_length();
            let body = response.bytes().await?;

            if (200..300).contains(&status) {
                debug!(status, content_length, "Response received");
            } else {
                info!(status, content_length, "Non-success response");
            }

            let (redirect_history, redirect_status_history) = if self.settings.track_redirects {
                if !history.is_empty() {
                    response_headers.insert(REDIRECT_HISTORY_HEADER, history.join(", "));
                    response_headers.insert(
                        REDIRECT_STATUS_HISTORY_HEADER,
                        status_history
                            .iter()
                            .map(u16::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    );
                }
                (history, status_history)
            } else {
                (Vec::new(), Vec::new())
            };

            return Ok(RawResponse {
                status,
                headers: response_headers,
                body,
                redirect_history,
                redirect_status_history,
            });
        }
    }
}

fn to_header_map(headers: &Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            Error::with_source(ErrorKind::InvalidHeader(format!("name '{name}'")), e)
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            Error::with_source(ErrorKind::InvalidHeader(format!("value for '{name}'")), e)
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn from_header_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let joined = match headers.get(name.as_str()) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.to_string(),
        };
        headers.insert(name.as_str(), joined);
    }
    headers
}
