//! Client configuration.
//!
//! A [`Config`] is the fully-resolved configuration in effect for a call.
//! [`ConfigOverrides`] carries the subset a caller wants to change, and
//! [`merge`] combines the two without touching either input.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{RedirectEvent, TransportSettings};

/// Callback invoked for every redirect the default transport follows.
pub type RedirectCallback = Arc<dyn Fn(&RedirectEvent) + Send + Sync>;

/// Retry bound meaning "retry until a non-retryable status or success".
pub const UNLIMITED_RETRIES: i32 = -1;

/// Status set used when `auth_retries_codes` cannot be interpreted.
pub const FALLBACK_RETRY_CODE: u16 = 500;

/// Configuration in effect for a request.
#[derive(Clone)]
pub struct Config {
    /// Base URI used to resolve relative endpoints when no catalog entry is selected.
    pub base_uri: String,
    /// Maximum number of redirects followed per request.
    pub max_redirects: usize,
    /// Keep the request method on 301/302 redirects instead of switching to GET.
    pub strict_redirects: bool,
    /// Send a `Referer` header when following redirects.
    pub referer_on_redirect: bool,
    /// Schemes a redirect may target.
    pub allowed_protocols: Vec<String>,
    /// Invoked for each redirect that is followed.
    pub on_redirect_callback: Option<RedirectCallback>,
    /// Record the redirect history on the response.
    pub track_redirects: bool,
    /// Fetch the bearer token while the client is built.
    pub auth_init: bool,
    /// Retry bound for retryable statuses; `-1` is unlimited.
    pub auth_retries: i32,
    /// Statuses that trigger a token refresh and a resend.
    pub auth_retries_codes: BTreeSet<u16>,
    /// Maximum number of requests in flight during a batch flush.
    pub batch_concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            max_redirects: 5,
            strict_redirects: false,
            referer_on_redirect: false,
            allowed_protocols: vec!["http".to_string(), "https".to_string()],
            on_redirect_callback: None,
            track_redirects: false,
            auth_init: false,
            auth_retries: 3,
            auth_retries_codes: BTreeSet::from([401, 500]),
            batch_concurrency: 15,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: crate::USER_AGENT.to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_uri", &self.base_uri)
            .field("max_redirects", &self.max_redirects)
            .field("strict_redirects", &self.strict_redirects)
            .field("referer_on_redirect", &self.referer_on_redirect)
            .field("allowed_protocols", &self.allowed_protocols)
            .field(
                "on_redirect_callback",
                &self.on_redirect_callback.as_ref().map(|_| "<callback>"),
            )
            .field("track_redirects", &self.track_redirects)
            .field("auth_init", &self.auth_init)
            .field("auth_retries", &self.auth_retries)
            .field("auth_retries_codes", &self.auth_retries_codes)
            .field("batch_concurrency", &self.batch_concurrency)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        let callbacks_match = match (&self.on_redirect_callback, &other.on_redirect_callback) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };

        callbacks_match
            && self.base_uri == other.base_uri
            && self.max_redirects == other.max_redirects
            && self.strict_redirects == other.strict_redirects
            && self.referer_on_redirect == other.referer_on_redirect
            && self.allowed_protocols == other.allowed_protocols
            && self.track_redirects == other.track_redirects
            && self.auth_init == other.auth_init
            && self.auth_retries == other.auth_retries
            && self.auth_retries_codes == other.auth_retries_codes
            && self.batch_concurrency == other.batch_concurrency
            && self.timeout == other.timeout
            && self.connect_timeout == other.connect_timeout
            && self.user_agent == other.user_agent
    }
}

impl Config {
    /// Create a new set of overrides to apply on top of a configuration.
    pub fn overrides() -> ConfigOverrides {
        ConfigOverrides::default()
    }

    /// Returns true if retries are unbounded.
    pub fn retries_unlimited(&self) -> bool {
        self.auth_retries < 0
    }

    /// Settings the default transport is built from.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            max_redirects: self.max_redirects,
            strict_redirects: self.strict_redirects,
            referer_on_redirect: self.referer_on_redirect,
            allowed_protocols: self.allowed_protocols.clone(),
            on_redirect_callback: self.on_redirect_callback.clone(),
            track_redirects: self.track_redirects,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Merge `overrides` onto `base`, returning a new normalized configuration.
pub fn merge(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();

    if let Some(ref base_uri) = overrides.base_uri {
        merged.base_uri = base_uri.clone();
    }
    if let Some(max) = overrides.max_redirects {
        merged.max_redirects = max;
    }
    if let Some(strict) = overrides.strict_redirects {
        merged.strict_redirects = strict;
    }
    if let Some(referer) = overrides.referer_on_redirect {
        merged.referer_on_redirect = referer;
    }
    if let Some(ref protocols) = overrides.allowed_protocols {
        merged.allowed_protocols = protocols.clone();
    }
    if let Some(ref callback) = overrides.on_redirect_callback {
        merged.on_redirect_callback = callback.clone();
    }
    if let Some(track) = overrides.track_redirects {
        merged.track_redirects = track;
    }
    if let Some(init) = overrides.auth_init {
        merged.auth_init = init;
    }
    if let Some(retries) = overrides.auth_retries {
        merged.auth_retries = retries;
    }
    if let Some(ref codes) = overrides.auth_retries_codes {
        merged.auth_retries_codes = codes.clone();
    }
    if let Some(concurrency) = overrides.batch_concurrency {
        merged.batch_concurrency = concurrency;
    }
    if let Some(timeout) = overrides.timeout {
        merged.timeout = timeout;
    }
    if let Some(timeout) = overrides.connect_timeout {
        merged.connect_timeout = timeout;
    }
    if let Some(ref user_agent) = overrides.user_agent {
        merged.user_agent = user_agent.clone();
    }

    normalize(merged)
}

fn normalize(mut config: Config) -> Config {
    if config.auth_retries < UNLIMITED_RETRIES {
        config.auth_retries = UNLIMITED_RETRIES;
    }
    if config.batch_concurrency == 0 {
        config.batch_concurrency = 1;
    }
    if config.auth_retries_codes.is_empty() {
        config.auth_retries_codes = BTreeSet::from([FALLBACK_RETRY_CODE]);
    }
    config
}

/// A partial configuration; unset fields keep the value they are merged onto.
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub base_uri: Option<String>,
    pub max_redirects: Option<usize>,
    pub strict_redirects: Option<bool>,
    pub referer_on_redirect: Option<bool>,
    pub allowed_protocols: Option<Vec<String>>,
    /// `Some(None)` clears a previously configured callback.
    pub on_redirect_callback: Option<Option<RedirectCallback>>,
    pub track_redirects: Option<bool>,
    pub auth_init: Option<bool>,
    pub auth_retries: Option<i32>,
    pub auth_retries_codes: Option<BTreeSet<u16>>,
    pub batch_concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverrides")
            .field("base_uri", &self.base_uri)
            .field("max_redirects", &self.max_redirects)
            .field("strict_redirects", &self.strict_redirects)
            .field("referer_on_redirect", &self.referer_on_redirect)
            .field("allowed_protocols", &self.allowed_protocols)
            .field(
                "on_redirect_callback",
                &self
                    .on_redirect_callback
                    .as_ref()
                    .map(|cb| cb.as_ref().map(|_| "<callback>")),
            )
            .field("track_redirects", &self.track_redirects)
            .field("auth_init", &self.auth_init)
            .field("auth_retries", &self.auth_retries)
            .field("auth_retries_codes", &self.auth_retries_codes)
            .field("batch_concurrency", &self.batch_concurrency)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ConfigOverrides {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.base_uri.is_none()
            && self.max_redirects.is_none()
            && self.strict_redirects.is_none()
            && self.referer_on_redirect.is_none()
            && self.allowed_protocols.is_none()
            && self.on_redirect_callback.is_none()
            && self.track_redirects.is_none()
            && self.auth_init.is_none()
            && self.auth_retries.is_none()
            && self.auth_retries_codes.is_none()
            && self.batch_concurrency.is_none()
            && self.timeout.is_none()
            && self.connect_timeout.is_none()
            && self.user_agent.is_none()
    }

    /// Set the base URI.
    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    /// Set the maximum number of redirects.
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Enable or disable strict (method-preserving) redirects.
    pub fn with_strict_redirects(mut self, strict: bool) -> Self {
        self.strict_redirects = Some(strict);
        self
    }

    /// Enable or disable the `Referer` header on redirects.
    pub fn with_referer_on_redirect(mut self, referer: bool) -> Self {
        self.referer_on_redirect = Some(referer);
        self
    }

    /// Set the schemes redirects may target.
    pub fn with_allowed_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    /// Set the redirect callback.
    pub fn with_on_redirect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RedirectEvent) + Send + Sync + 'static,
    {
        self.on_redirect_callback = Some(Some(Arc::new(callback)));
        self
    }

    /// Remove any configured redirect callback.
    pub fn without_on_redirect(mut self) -> Self {
        self.on_redirect_callback = Some(None);
        self
    }

    /// Enable or disable redirect history tracking.
    pub fn with_track_redirects(mut self, track: bool) -> Self {
        self.track_redirects = Some(track);
        self
    }

    /// Enable or disable eager token acquisition.
    pub fn with_auth_init(mut self, init: bool) -> Self {
        self.auth_init = Some(init);
        self
    }

    /// Set the retry bound. Values below `-1` are treated as `-1` (unlimited).
    pub fn with_auth_retries(mut self, retries: i32) -> Self {
        self.auth_retries = Some(retries);
        self
    }

    /// Set the statuses that trigger a token refresh and resend.
    pub fn with_auth_retries_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.auth_retries_codes = Some(codes.into_iter().collect());
        self
    }

    /// Set the batch concurrency bound.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = Some(concurrency);
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set a custom User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Parse overrides from an untyped JSON mapping using the recognized keys.
    ///
    /// `auth_retries_codes` accepts an array of status codes or a lone
    /// integer; anything else falls back to `{500}`. Unknown keys are ignored.
    /// `on_redirect_callback` can only be cleared (`null`) from JSON.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            Error::new(ErrorKind::Config(
                "configuration overrides must be a mapping".to_string(),
            ))
        })?;

        let mut overrides = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "base_uri" => overrides.base_uri = Some(expect_str(key, value)?.to_string()),
                "max_redirects" => overrides.max_redirects = Some(expect_u64(key, value)? as usize),
                "strict_redirects" => overrides.strict_redirects = Some(expect_bool(key, value)?),
                "referer_on_redirect" => {
                    overrides.referer_on_redirect = Some(expect_bool(key, value)?)
                }
                "allowed_protocols" => {
                    let protocols = value
                        .as_array()
                        .and_then(|items| {
                            items
                                .iter()
                                .map(|p| p.as_str().map(str::to_string))
                                .collect::<Option<Vec<_>>>()
                        })
                        .ok_or_else(|| invalid_type(key, "an array of strings"))?;
                    overrides.allowed_protocols = Some(protocols);
                }
                "on_redirect_callback" => {
                    if !value.is_null() {
                        return Err(invalid_type(key, "null"));
                    }
                    overrides.on_redirect_callback = Some(None);
                }
                "track_redirects" => overrides.track_redirects = Some(expect_bool(key, value)?),
                "auth_init" => overrides.auth_init = Some(expect_bool(key, value)?),
                "auth_retries" => {
                    let retries = value
                        .as_i64()
                        .ok_or_else(|| invalid_type(key, "an integer"))?;
                    overrides.auth_retries =
                        Some(retries.clamp(i64::from(UNLIMITED_RETRIES), i64::from(i32::MAX)) as i32);
                }
                "auth_retries_codes" => {
                    overrides.auth_retries_codes = Some(coerce_status_codes(value));
                }
                "batch_concurrency" => {
                    overrides.batch_concurrency = Some(expect_u64(key, value)? as usize)
                }
                "timeout" => {
                    overrides.timeout = Some(Duration::from_secs(expect_u64(key, value)?))
                }
                "connect_timeout" => {
                    overrides.connect_timeout = Some(Duration::from_secs(expect_u64(key, value)?))
                }
                "user_agent" => overrides.user_agent = Some(expect_str(key, value)?.to_string()),
                other => debug!(key = other, "Ignoring unrecognized configuration key"),
            }
        }

        Ok(overrides)
    }
}

/// Interpret `auth_retries_codes`: an array of statuses, a lone status, or `{500}`.
fn coerce_status_codes(value: &Value) -> BTreeSet<u16> {
    let as_status = |v: &Value| v.as_u64().and_then(|n| u16::try_from(n).ok());

    match value {
        Value::Array(items) => items
            .iter()
            .map(as_status)
            .collect::<Option<BTreeSet<u16>>>()
            .filter(|codes| !codes.is_empty())
            .unwrap_or_else(|| BTreeSet::from([FALLBACK_RETRY_CODE])),
        Value::Number(_) => as_status(value)
            .map(|code| BTreeSet::from([code]))
            .unwrap_or_else(|| BTreeSet::from([FALLBACK_RETRY_CODE])),
        _ => BTreeSet::from([FALLBACK_RETRY_CODE]),
    }
}

fn invalid_type(key: &str, expected: &str) -> Error {
    Error::new(ErrorKind::Config(format!("'{key}' must be {expected}")))
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| invalid_type(key, "a string"))
}

fn expect_bool(key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| invalid_type(key, "a boolean"))
}

fn expect_u64(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| invalid_type(key, "a non-negative integer"))
}
