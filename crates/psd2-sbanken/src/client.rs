//! SBanken open banking API client.
//!
//! This client wraps [`BankClient`] from `psd2-client` with the SBanken
//! endpoint catalog and default headers, and turns each bank operation into
//! one core request plus a check of the returned body.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use psd2_client::{
    ApiCall, BankClient, ClientBuilder, Config, ConfigOverrides, Credentials, EndpointCatalog,
    Headers, Reply, CONTENT_TYPE, TOKEN_ENDPOINT,
};

use crate::error::{Error, ErrorKind, Result};
use crate::types::{EInvoicePayment, EInvoiceQuery, TransactionQuery, Transfer};

/// Token endpoint base.
pub const TOKEN_URL: &str = "https://auth.sbanken.no/identityserver/";
/// Customer API base.
pub const CUSTOMERS_URL: &str = "https://api.sbanken.no/customers/api/v1/";
/// Bank (accounts, transactions, e-invoices, transfers) API base.
pub const ACCOUNTS_URL: &str = "https://api.sbanken.no/bank/api/v1/";

/// Catalog entry of the customer API.
pub const CUSTOMERS: &str = "customers";
/// Catalog entry of the bank API.
pub const ACCOUNTS: &str = "accounts";

const CUSTOMER_ID: &str = "customerId";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Production endpoints.
pub fn endpoints() -> EndpointCatalog {
    EndpointCatalog::new()
        .with(TOKEN_ENDPOINT, TOKEN_URL)
        .with(CUSTOMERS, CUSTOMERS_URL)
        .with(ACCOUNTS, ACCOUNTS_URL)
}

/// Headers sent with every SBanken request.
pub fn default_headers() -> Headers {
    Headers::new()
        .with("Accept", "application/json")
        .with(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
}

/// SBanken API client.
///
/// Provides the bank operations:
/// - Customer information
/// - Accounts and account details
/// - Transactions within a date window
/// - E-invoices: listing, lookup and payment
/// - Transfers between the customer's own accounts
///
/// # Example
///
/// ```rust,ignore
/// use psd2_sbanken::{SBanken, TransactionQuery};
/// use psd2_client::{Config, Credentials};
///
/// let mut bank = SBanken::new(Credentials::from_env(Some("SBANKEN"))?, Config::overrides()).await?;
///
/// let accounts = bank.accounts("12345678901").await?;
/// let transactions = bank
///     .transactions("12345678901", "account-id", TransactionQuery::default())
///     .await?;
/// ```
#[derive(Debug)]
pub struct SBanken {
    client: BankClient,
}

impl SBanken {
    /// Connect to the production endpoints.
    pub async fn new(credentials: Credentials, config: ConfigOverrides) -> Result<Self> {
        let client = Self::builder(credentials).with_config(config).build().await?;
        Ok(Self::from_client(client))
    }

    /// A core client builder preloaded with the SBanken endpoints, headers
    /// and defaults. Override the endpoints to point at another host.
    pub fn builder(credentials: Credentials) -> ClientBuilder {
        BankClient::builder(credentials)
            .with_endpoints(endpoints())
            .with_default_headers(default_headers())
            .with_defaults(Config::overrides().with_base_uri(TOKEN_URL))
    }

    /// Wrap an already built core client.
    pub fn from_client(client: BankClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BankClient {
        &self.client
    }

    /// Mutable access to the core client, e.g. for queueing and flushing.
    pub fn client_mut(&mut self) -> &mut BankClient {
        &mut self.client
    }

    pub fn into_inner(self) -> BankClient {
        self.client
    }

    /// Base URL of the catalog entry `name`.
    pub fn endpoint(&self, name: &str) -> Result<&str> {
        self.client
            .endpoints()
            .get(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownEndpoint(name.to_string())))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// The request behind [`customer`](Self::customer).
    pub fn customer_call(&self, customer_id: &str) -> Result<ApiCall> {
        Ok(ApiCall::get(format!("{}Customers", self.endpoint(CUSTOMERS)?))
            .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`accounts`](Self::accounts).
    pub fn accounts_call(&self, customer_id: &str) -> Result<ApiCall> {
        Ok(ApiCall::get(format!("{}Accounts", self.endpoint(ACCOUNTS)?))
            .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`account`](Self::account).
    pub fn account_call(&self, customer_id: &str, account_id: &str) -> Result<ApiCall> {
        Ok(ApiCall::get(format!(
            "{}Accounts/{}",
            self.endpoint(ACCOUNTS)?,
            urlencoding::encode(account_id)
        ))
        .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`transactions`](Self::transactions), with the
    /// date window resolved against `today`.
    pub fn transactions_call(
        &self,
        customer_id: &str,
        account_id: &str,
        query: &TransactionQuery,
        today: NaiveDate,
    ) -> Result<ApiCall> {
        let (start, end) = query.window(today)?;

        let mut parameters = Map::new();
        parameters.insert("index".into(), query.index.into());
        parameters.insert("length".into(), query.length.into());
        parameters.insert("startDate".into(), start.to_string().into());
        parameters.insert("endDate".into(), end.to_string().into());

        Ok(ApiCall::get(format!(
            "{}Transactions/{}",
            self.endpoint(ACCOUNTS)?,
            urlencoding::encode(account_id)
        ))
        .with_parameters(parameters)
        .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`e_invoices`](Self::e_invoices), with the date
    /// window resolved against `today`.
    pub fn e_invoices_call(
        &self,
        customer_id: &str,
        query: &EInvoiceQuery,
        today: NaiveDate,
    ) -> Result<ApiCall> {
        let (start, end) = query.window(today)?;

        let mut parameters = Map::new();
        parameters.insert("status".into(), query.status.as_str().into());
        parameters.insert("index".into(), query.index.into());
        parameters.insert("length".into(), query.length.into());
        parameters.insert("startDate".into(), start.to_string().into());
        parameters.insert("endDate".into(), end.to_string().into());

        Ok(ApiCall::get(format!("{}EFakturas", self.endpoint(ACCOUNTS)?))
            .with_parameters(parameters)
            .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`e_invoice`](Self::e_invoice).
    pub fn e_invoice_call(&self, customer_id: &str, e_invoice_id: &str) -> Result<ApiCall> {
        Ok(ApiCall::get(format!(
            "{}EFakturas/{}",
            self.endpoint(ACCOUNTS)?,
            urlencoding::encode(e_invoice_id)
        ))
        .with_header(CUSTOMER_ID, customer_id))
    }

    /// The request behind [`transfer`](Self::transfer).
    pub fn transfer_call(&self, customer_id: &str, transfer: &Transfer) -> Result<ApiCall> {
        if !transfer.amount.is_finite() || transfer.amount <= 0.0 {
            return Err(Error::validation("The transfer amount must be a positive number."));
        }
        self.json_post("Transfers", customer_id, transfer)
    }

    /// The request behind [`pay_e_invoice`](Self::pay_e_invoice).
    pub fn pay_e_invoice_call(
        &self,
        customer_id: &str,
        payment: &EInvoicePayment,
    ) -> Result<ApiCall> {
        self.json_post("EFakturas", customer_id, payment)
    }

    fn json_post<T: Serialize>(&self, path: &str, customer_id: &str, body: &T) -> Result<ApiCall> {
        let parameters = match serde_json::to_value(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(Error::validation(format!(
                    "request body for {path} must serialize to an object"
                )))
            }
            Err(e) => return Err(psd2_client::Error::from(e).into()),
        };

        Ok(ApiCall::post(format!("{}{path}", self.endpoint(ACCOUNTS)?))
            .with_parameters(parameters)
            .with_header(CUSTOMER_ID, customer_id)
            .with_header(CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Customer information.
    #[instrument(skip(self))]
    pub async fn customer(&mut self, customer_id: &str) -> Result<Value> {
        let call = self.customer_call(customer_id)?;
        self.send(
            call,
            "Could not retrieve Customer information. Ensure that you have the correct privileges to do so.",
        )
        .await
    }

    /// All accounts of the customer.
    #[instrument(skip(self))]
    pub async fn accounts(&mut self, customer_id: &str) -> Result<Value> {
        let call = self.accounts_call(customer_id)?;
        self.send(
            call,
            "Could not retrieve Accounts. Ensure that you have the correct privileges to do so.",
        )
        .await
    }

    /// One account of the customer.
    #[instrument(skip(self))]
    pub async fn account(&mut self, customer_id: &str, account_id: &str) -> Result<Value> {
        let call = self.account_call(customer_id, account_id)?;
        self.send(
            call,
            "Could not retrieve Account. Ensure that you have the correct privileges to do so.",
        )
        .await
    }

    /// Transactions of an account within the query's date window.
    #[instrument(skip(self))]
    pub async fn transactions(
        &mut self,
        customer_id: &str,
        account_id: &str,
        query: TransactionQuery,
    ) -> Result<Value> {
        let call = self.transactions_call(customer_id, account_id, &query, today())?;
        self.send(
            call,
            "Could not retrieve Transactions. Ensure that you have the correct privileges to do so.",
        )
        .await
    }

    /// E-invoices matching the query.
    #[instrument(skip(self))]
    pub async fn e_invoices(&mut self, customer_id: &str, query: EInvoiceQuery) -> Result<Value> {
        let call = self.e_invoices_call(customer_id, &query, today())?;
        self.send(
            call,
            "Could not retrieve E-Invoices. Ensure that you have the correct access privileges.",
        )
        .await
    }

    /// One e-invoice.
    #[instrument(skip(self))]
    pub async fn e_invoice(&mut self, customer_id: &str, e_invoice_id: &str) -> Result<Value> {
        let call = self.e_invoice_call(customer_id, e_invoice_id)?;
        self.send(
            call,
            "Could not retrieve E-Invoice. Ensure that you have the correct access privileges.",
        )
        .await
    }

    /// Move money between two of the customer's own accounts.
    #[instrument(skip(self, transfer))]
    pub async fn transfer(&mut self, customer_id: &str, transfer: &Transfer) -> Result<Value> {
        let call = self.transfer_call(customer_id, transfer)?;
        self.send(
            call,
            "Could not make transfer. Ensure that you have the correct access privileges.",
        )
        .await
    }

    /// Pay a new e-invoice.
    #[instrument(skip(self, payment))]
    pub async fn pay_e_invoice(
        &mut self,
        customer_id: &str,
        payment: &EInvoicePayment,
    ) -> Result<Value> {
        let call = self.pay_e_invoice_call(customer_id, payment)?;
        self.send(
            call,
            "Could not pay e-invoice. Make sure that you have the correct access privileges and that the e-invoice hasn't been paid already.",
        )
        .await
    }

    async fn send(&mut self, call: ApiCall, failure_message: &'static str) -> Result<Value> {
        match self.client.request(call).await? {
            Reply::Queued(ticket) => Err(Error::new(ErrorKind::Queued(ticket))),
            Reply::Ready(Err(failure)) => {
                debug!(status = failure.status, "SBanken request failed");
                Err(Error::api(failure_message, failure))
            }
            Reply::Ready(Ok(body)) => {
                let body = body.into_json().unwrap_or(Value::Null);
                if is_successful(&body) {
                    Ok(body)
                } else {
                    Err(Error::new(ErrorKind::IntegrationSemantic(
                        failure_message.to_string(),
                    )))
                }
            }
        }
    }
}

/// A successful SBanken body is a JSON object without `isError: true`.
pub fn is_successful(body: &Value) -> bool {
    body.as_object().is_some_and(|object| {
        !object
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    })
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn offline() -> SBanken {
        SBanken::new(Credentials::new("id", "sec"), Config::overrides())
            .await
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_is_successful() {
        assert!(is_successful(&json!({"items": []})));
        assert!(is_successful(&json!({"isError": false})));
        assert!(!is_successful(&json!({"isError": true, "errorMessage": "nope"})));
        assert!(!is_successful(&json!([1, 2])));
        assert!(!is_successful(&Value::Null));
    }

    #[tokio::test]
    async fn test_defaults() {
        let bank = offline().await;
        assert_eq!(bank.client().get_configuration().base_uri, TOKEN_URL);
        assert_eq!(bank.client().current_endpoint(), Some(TOKEN_URL));
        assert_eq!(bank.endpoint(ACCOUNTS).unwrap(), ACCOUNTS_URL);

        let err = bank.endpoint("cards").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownEndpoint(_)));
    }

    #[tokio::test]
    async fn test_account_call_encodes_id() {
        let bank = offline().await;
        let call = bank.account_call("123", "a b/c").unwrap();
        assert_eq!(call.endpoint, format!("{ACCOUNTS_URL}Accounts/a%20b%2Fc"));
        assert_eq!(call.headers.get("customerId"), Some("123"));
    }

    #[tokio::test]
    async fn test_transactions_call_parameters() {
        let bank = offline().await;
        let query = TransactionQuery::default()
            .with_length(50)
            .with_start_date(date(2024, 1, 1));
        let call = bank
            .transactions_call("123", "acc", &query, date(2024, 2, 1))
            .unwrap();

        let psd2_client::Parameters::Map(parameters) = call.parameters else {
            panic!("expected mapped parameters");
        };
        assert_eq!(parameters["index"], 0);
        assert_eq!(parameters["length"], 50);
        assert_eq!(parameters["startDate"], "2024-01-01");
        assert_eq!(parameters["endDate"], "2024-02-01");
    }

    #[tokio::test]
    async fn test_transfer_call_is_json() {
        let bank = offline().await;
        let call = bank
            .transfer_call("123", &Transfer::new("a", "b", "rent", 10.0))
            .unwrap();
        assert_eq!(call.method, psd2_client::Method::Post);
        assert_eq!(call.headers.get("content-type"), Some(JSON_CONTENT_TYPE));

        let err = bank
            .transfer_call("123", &Transfer::new("a", "b", "rent", -1.0))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Validation(_)));
    }
}
