//! Client-credentials authentication.
//!
//! Sensitive values (secret, access token) are redacted in Debug output.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

/// Path of the token endpoint, relative to the catalog's `token` entry.
pub const TOKEN_PATH: &str = "connect/token";

/// Default environment variable prefix for [`Credentials::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "PSD2";

/// Client identifier and secret issued by the bank.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Create credentials from an identifier and secret.
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Read `<PREFIX>_CLIENT_ID` and `<PREFIX>_CLIENT_SECRET`.
    pub fn from_env(prefix: Option<&str>) -> Result<Self> {
        let prefix = prefix.unwrap_or(DEFAULT_ENV_PREFIX);
        let read = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            std::env::var(&name).map_err(|e| {
                Error::with_source(
                    ErrorKind::Config(format!("environment variable {name} is not set")),
                    e,
                )
            })
        };

        Ok(Self::new(read("CLIENT_ID")?, read("CLIENT_SECRET")?))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    /// `Basic` authorization value used against the token endpoint.
    ///
    /// Both halves are URL-encoded before being joined and base64-encoded.
    pub fn basic_authorization(&self) -> String {
        let pair = format!(
            "{}:{}",
            urlencoding::encode(&self.identifier),
            urlencoding::encode(self.secret())
        );
        format!("Basic {}", STANDARD.encode(pair))
    }
}

/// Bearer token issued by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token_type: String,
    pub access_token: String,
    /// Lifetime in seconds as reported by the endpoint.
    pub expires_in: i64,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token_type", &self.token_type)
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl AuthToken {
    /// `Authorization` header value, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Parse the token endpoint's JSON body.
    pub fn from_response_body(status: u16, body: &[u8]) -> Result<Self> {
        let parsed: TokenResponse = serde_json::from_slice(body).map_err(|e| {
            Error::with_source(
                ErrorKind::AuthToken(format!(
                    "token endpoint returned status {status} with an unreadable body. \
                     Ensure that your client id and secret are correct"
                )),
                e,
            )
        })?;

        let missing = |field: &str| {
            Error::new(ErrorKind::AuthToken(format!(
                "token endpoint returned status {status} without '{field}'. \
                 Ensure that your client id and secret are correct"
            )))
        };

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("access_token"))?;
        let token_type = parsed
            .token_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("token_type"))?;

        Ok(Self {
            token_type,
            access_token,
            expires_in: parsed.expires_in.unwrap_or_default(),
        })
    }
}

/// Token endpoint response fields.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}
