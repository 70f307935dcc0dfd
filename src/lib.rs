//! # psd2-api
//!
//! PSD2 bank API client library for Rust.
//!
//! This library connects to bank APIs that authenticate with OAuth
//! client credentials, with built-in token handling, status-keyed retries,
//! configuration layering and batched concurrent requests.
//!
//! ## Security
//!
//! - Client secrets and access tokens are redacted in Debug output
//! - Tracing spans skip credential parameters
//! - Failure messages have bearer tokens scrubbed
//!
//! ## Crates
//!
//! - **psd2-client** - Request-dispatch core: config layering, auth, retry, batch queue
//! - **psd2-sbanken** - SBanken integration: customers, accounts, transactions, e-invoices, transfers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use psd2_api::{Config, Credentials, Integration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::from_env(Some("SBANKEN"))?;
//!
//!     // Look the bank up by name
//!     let integration = psd2_api::connect("sbanken", credentials, Config::overrides()).await?;
//!
//!     if let Integration::SBanken(mut bank) = integration {
//!         let accounts = bank.accounts("12345678901").await?;
//!         println!("{accounts:#}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "client")]
mod bank;

// Re-export member crates for convenient access
#[cfg(feature = "client")]
pub use psd2_client as client;
#[cfg(feature = "sbanken")]
pub use psd2_sbanken as sbanken;

#[cfg(feature = "client")]
pub use bank::{connect, Bank, Error, ErrorKind, Integration, Result};

// Re-export commonly used types at the top level
#[cfg(feature = "client")]
pub use psd2_client::{ApiCall, BankClient, Config, ConfigOverrides, Credentials, Reply};
#[cfg(feature = "sbanken")]
pub use psd2_sbanken::SBanken;
