//! Request models and query windows for the SBanken operations.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::error::{Error, Result};

/// Earliest date the API accepts in a query window.
pub const MIN_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(date) => date,
    None => panic!("2000-01-01 is a valid date"),
};

/// Largest page size for e-invoice listings.
pub const MAX_E_INVOICE_LENGTH: i32 = 1000;

/// Paging and date window for [`SBanken::transactions`](crate::SBanken::transactions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    pub index: i32,
    pub length: i32,
    /// Defaults to 30 days before the end date.
    pub start_date: Option<NaiveDate>,
    /// Defaults to today; at most tomorrow.
    pub end_date: Option<NaiveDate>,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            index: 0,
            length: 100,
            start_date: None,
            end_date: None,
        }
    }
}

impl TransactionQuery {
    pub fn with_index(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.length = length;
        self
    }

    pub fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    /// Resolve the date window relative to `today`.
    pub fn window(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        let max_end = add_days(today, 1)?;
        let end = self.end_date.unwrap_or(today);
        let start = match self.start_date {
            Some(start) => start,
            None => sub_days(end, 30)?,
        };
        check_window(start, end, max_end)?;
        Ok((start, end))
    }
}

/// Processing status filter for e-invoices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EInvoiceStatus {
    #[default]
    All,
    New,
    Processed,
    Deleted,
}

impl EInvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EInvoiceStatus::All => "ALL",
            EInvoiceStatus::New => "NEW",
            EInvoiceStatus::Processed => "PROCESSED",
            EInvoiceStatus::Deleted => "DELETED",
        }
    }
}

impl FromStr for EInvoiceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(EInvoiceStatus::All),
            "NEW" => Ok(EInvoiceStatus::New),
            "PROCESSED" => Ok(EInvoiceStatus::Processed),
            "DELETED" => Ok(EInvoiceStatus::Deleted),
            _ => Err(Error::validation(
                "The status needs to be ALL, NEW, PROCESSED or DELETED.",
            )),
        }
    }
}

impl fmt::Display for EInvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter, paging and date window for [`SBanken::e_invoices`](crate::SBanken::e_invoices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EInvoiceQuery {
    pub status: EInvoiceStatus,
    pub index: i32,
    /// Between 0 and 1000.
    pub length: i32,
    /// Defaults to 60 days before the end date.
    pub start_date: Option<NaiveDate>,
    /// Defaults to 60 days from today, which is also the maximum.
    pub end_date: Option<NaiveDate>,
}

impl Default for EInvoiceQuery {
    fn default() -> Self {
        Self {
            status: EInvoiceStatus::All,
            index: 0,
            length: 100,
            start_date: None,
            end_date: None,
        }
    }
}

impl EInvoiceQuery {
    pub fn with_status(mut self, status: EInvoiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_index(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.length = length;
        self
    }

    pub fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    /// Check the page size and resolve the date window relative to `today`.
    pub fn window(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        if self.length > MAX_E_INVOICE_LENGTH {
            return Err(Error::validation(format!(
                "The maximum length that can be used is {MAX_E_INVOICE_LENGTH}."
            )));
        }
        if self.length < 0 {
            return Err(Error::validation("The length needs to be at least 0."));
        }

        let max_end = add_days(today, 60)?;
        let end = self.end_date.unwrap_or(max_end);
        let start = match self.start_date {
            Some(start) => start,
            None => sub_days(end, 60)?,
        };
        check_window(start, end, max_end)?;
        Ok((start, end))
    }
}

/// Transfer between two of the customer's own accounts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from_account_id: String,
    pub to_account_id: String,
    pub message: String,
    pub amount: f64,
}

impl Transfer {
    pub fn new(
        from_account_id: impl Into<String>,
        to_account_id: impl Into<String>,
        message: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            from_account_id: from_account_id.into(),
            to_account_id: to_account_id.into(),
            message: message.into(),
            amount,
        }
    }
}

/// Payment of a new e-invoice from one of the customer's accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EInvoicePayment {
    #[serde(rename = "eFakturaId")]
    pub e_invoice_id: String,
    pub account_id: String,
    pub pay_only_minimum_amount: bool,
}

impl EInvoicePayment {
    pub fn new(e_invoice_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            e_invoice_id: e_invoice_id.into(),
            account_id: account_id.into(),
            pay_only_minimum_amount: false,
        }
    }

    pub fn minimum_amount_only(mut self) -> Self {
        self.pay_only_minimum_amount = true;
        self
    }
}

fn check_window(start: NaiveDate, end: NaiveDate, max_end: NaiveDate) -> Result<()> {
    if end > max_end {
        return Err(Error::validation(format!(
            "The maximum end date that is allowed by this API is {max_end}"
        )));
    }
    if start < MIN_DATE {
        return Err(Error::validation(format!(
            "The minimum start date that is allowed by this API is {MIN_DATE}"
        )));
    }
    Ok(())
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| Error::validation(format!("{date} + {days} days is out of range")))
}

fn sub_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(days))
        .ok_or_else(|| Error::validation(format!("{date} - {days} days is out of range")))
}
