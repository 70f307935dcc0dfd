//! # psd2-sbanken
//!
//! SBanken open banking API integration.
//!
//! This crate provides:
//! - The SBanken endpoint catalog and default headers
//! - Customer, account and transaction lookups
//! - E-invoice listing, lookup and payment
//! - Transfers between the customer's own accounts
//!
//! Every operation validates its arguments, sends one request through
//! [`psd2_client::BankClient`] (with its token handling and retries) and
//! rejects bodies that do not look like a successful result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use psd2_client::{Config, Credentials};
//! use psd2_sbanken::{EInvoiceQuery, EInvoiceStatus, SBanken};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), psd2_sbanken::Error> {
//!     let credentials = Credentials::from_env(Some("SBANKEN"))?;
//!     let mut bank = SBanken::new(credentials, Config::overrides().with_auth_retries(2)).await?;
//!
//!     let invoices = bank
//!         .e_invoices(
//!             "12345678901",
//!             EInvoiceQuery::default().with_status(EInvoiceStatus::New),
//!         )
//!         .await?;
//!     println!("{invoices:#}");
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{
    default_headers, endpoints, is_successful, SBanken, ACCOUNTS, ACCOUNTS_URL, CUSTOMERS,
    CUSTOMERS_URL, TOKEN_URL,
};
pub use error::{Error, ErrorKind, Result};
pub use types::{
    EInvoicePayment, EInvoiceQuery, EInvoiceStatus, TransactionQuery, Transfer,
    MAX_E_INVOICE_LENGTH, MIN_DATE,
};
