//! # psd2-client
//!
//! Request-dispatch core shared by the bank integrations.
//!
//! This crate provides:
//! - Configuration layering with one-shot overrides restored after each call
//! - Client-credentials auth with a lazily fetched, force-refreshable token
//! - Status-keyed retries that refresh the token before resending
//! - A batch queue flushed with bounded concurrency, in submission order
//! - JSON, raw and custom response decoding
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Bank integrations                        │
//! │  (psd2-sbanken)                                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BankClient                            │
//! │  - Active/baseline Config, cached AuthToken, BatchQueue     │
//! │  - RequestBuilder per attempt, RetryState per call          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transport (ReqwestTransport)                │
//! │  - One request in, one response out                         │
//! │  - Redirect policy from Config                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use psd2_client::{ApiCall, BankClient, Credentials, EndpointCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), psd2_client::Error> {
//!     let mut client = BankClient::builder(Credentials::from_env(None)?)
//!         .with_endpoints(
//!             EndpointCatalog::new()
//!                 .with("token", "https://auth.example.com/")
//!                 .with("bank", "https://api.example.com/bank/"),
//!         )
//!         .with_current_endpoint("bank")
//!         .build()
//!         .await?;
//!
//!     // Buffer two calls and send them together
//!     client.queue();
//!     client.request(ApiCall::get("Accounts")).await?;
//!     client.request(ApiCall::get("Customers")).await?;
//!     for slot in client.flush(None).await {
//!         println!("{:?}", slot?);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod endpoint;
mod error;
mod queue;
mod request;
mod response;
mod retry;
mod transport;

pub use auth::{AuthToken, Credentials, DEFAULT_ENV_PREFIX, TOKEN_PATH};
pub use client::{BankClient, ClientBuilder, Reply};
pub use config::{
    merge, Config, ConfigOverrides, RedirectCallback, FALLBACK_RETRY_CODE, UNLIMITED_RETRIES,
};
pub use endpoint::{EndpointCatalog, TOKEN_ENDPOINT};
pub use error::{Error, ErrorKind, Result};
pub use queue::{QueuedRequest, Ticket};
pub use request::{
    has_scheme, merge_query, resolve_endpoint, ApiCall, Headers, Method, Parameters,
    PendingRequest, RequestBuilder, AUTHORIZATION, CONTENT_TYPE, FORM_CONTENT_TYPE,
};
pub use response::{
    sanitize_error_message, ApiFailure, ApiResult, Body, Decoder, Decoders, ResponseType,
};
pub use retry::{RetryDecision, RetryState};
pub use transport::{
    RawResponse, RedirectEvent, Redirects, ReqwestTransport, Transport, TransportSettings,
    REDIRECT_HISTORY_HEADER, REDIRECT_STATUS_HISTORY_HEADER,
};

/// Default User-Agent sent by the reqwest transport.
pub const USER_AGENT: &str = concat!("psd2-api/", env!("CARGO_PKG_VERSION"));

/// Re-export async_trait so custom transports can implement [`Transport`].
pub use async_trait::async_trait;
