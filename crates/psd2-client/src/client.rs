//! The dispatch engine shared by bank integrations.
//!
//! [`BankClient`] owns the active and baseline configuration, the cached
//! token, the batch queue and the transport. Every mutating operation takes
//! `&mut self`, so one call at a time can touch that state.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthToken, Credentials, TOKEN_PATH};
use crate::config::{merge, Config, ConfigOverrides};
use crate::endpoint::{EndpointCatalog, TOKEN_ENDPOINT};
use crate::error::Result;
use crate::queue::{self, BatchQueue, Ticket};
use crate::request::{
    ApiCall, Headers, Method, Parameters, PendingRequest, RequestBuilder, AUTHORIZATION,
    CONTENT_TYPE, FORM_CONTENT_TYPE,
};
use crate::response::{ensure_supported, translate, ApiFailure, ApiResult, Body, Decoders};
use crate::retry::{RetryDecision, RetryState};
use crate::transport::{Redirects, ReqwestTransport, Transport};

/// Outcome of [`BankClient::request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The request was sent; holds the decoded body or the failing response.
    Ready(ApiResult),
    /// Queueing mode is on; the request waits for [`BankClient::flush`].
    Queued(Ticket),
}

impl Reply {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Reply::Queued(ticket) => Some(*ticket),
            Reply::Ready(_) => None,
        }
    }

    /// The dispatched result, or `None` for a queued request.
    pub fn into_result(self) -> Option<ApiResult> {
        match self {
            Reply::Ready(result) => Some(result),
            Reply::Queued(_) => None,
        }
    }
}

enum TransportHandle {
    /// Built from the active configuration and rebuilt when it changes.
    Managed(Arc<ReqwestTransport>),
    /// Supplied by the caller; never replaced.
    Custom(Arc<dyn Transport>),
}

impl TransportHandle {
    fn shared(&self) -> Arc<dyn Transport> {
        match self {
            TransportHandle::Managed(transport) => Arc::clone(transport) as Arc<dyn Transport>,
            TransportHandle::Custom(transport) => Arc::clone(transport),
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportHandle::Managed(transport) => f.debug_tuple("Managed").field(transport).finish(),
            TransportHandle::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Builder for [`BankClient`].
pub struct ClientBuilder {
    credentials: Credentials,
    endpoints: EndpointCatalog,
    current_endpoint: Option<String>,
    default_headers: Headers,
    defaults: ConfigOverrides,
    overrides: ConfigOverrides,
    transport: Option<Arc<dyn Transport>>,
    decoders: Decoders,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .field("current_endpoint", &self.current_endpoint)
            .field("default_headers", &self.default_headers)
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides)
            .field("custom_transport", &self.transport.is_some())
            .field("decoders", &self.decoders)
            .finish()
    }
}

impl ClientBuilder {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoints: EndpointCatalog::new(),
            current_endpoint: None,
            default_headers: Headers::new(),
            defaults: ConfigOverrides::default(),
            overrides: ConfigOverrides::default(),
            transport: None,
            decoders: Decoders::new(),
        }
    }

    /// Set the endpoint catalog. It must contain a `token` entry.
    pub fn with_endpoints(mut self, endpoints: EndpointCatalog) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Resolve relative endpoints against the catalog entry `name`.
    pub fn with_current_endpoint(mut self, name: impl Into<String>) -> Self {
        self.current_endpoint = Some(name.into());
        self
    }

    /// Headers sent with every request, below per-call headers.
    pub fn with_default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    /// Integration defaults, applied on top of the base defaults.
    pub fn with_defaults(mut self, defaults: ConfigOverrides) -> Self {
        self.defaults = defaults;
        self
    }

    /// Caller configuration, applied on top of the integration defaults.
    pub fn with_config(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Send through `transport` instead of the default reqwest transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register a decoder for [`ResponseType::Custom`](crate::ResponseType::Custom).
    pub fn with_decoder<F>(mut self, name: &str, decoder: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Body> + Send + Sync + 'static,
    {
        self.decoders.register(name, decoder);
        self
    }

    /// Build the client, fetching a token right away when `auth_init` is set.
    pub async fn build(self) -> Result<BankClient> {
        self.endpoints.require(TOKEN_ENDPOINT)?;
        if let Some(ref name) = self.current_endpoint {
            self.endpoints.require(name)?;
        }

        let baseline = merge(&merge(&Config::default(), &self.defaults), &self.overrides);
        let transport = match self.transport {
            Some(transport) => TransportHandle::Custom(transport),
            None => TransportHandle::Managed(Arc::new(ReqwestTransport::new(
                baseline.transport_settings(),
            )?)),
        };

        let mut client = BankClient {
            credentials: self.credentials,
            endpoints: self.endpoints,
            current_endpoint: self.current_endpoint,
            default_headers: self.default_headers,
            active: baseline.clone(),
            baseline,
            token: None,
            queue: BatchQueue::new(),
            transport,
            decoders: self.decoders,
            last_redirects: Redirects::default(),
        };

        if client.active.auth_init {
            debug!("Fetching auth token at construction");
            client.get_auth_token(true).await?;
        }

        Ok(client)
    }
}

/// Authenticated client with config layering, retries and batching.
pub struct BankClient {
    credentials: Credentials,
    endpoints: EndpointCatalog,
    current_endpoint: Option<String>,
    default_headers: Headers,
    active: Config,
    baseline: Config,
    token: Option<AuthToken>,
    queue: BatchQueue,
    transport: TransportHandle,
    decoders: Decoders,
    last_redirects: Redirects,
}

impl fmt::Debug for BankClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankClient")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .field("current_endpoint", &self.current_endpoint)
            .field("active", &self.active)
            .field("has_token", &self.token.is_some())
            .field("queueing", &self.queue.is_active())
            .field("pending", &self.queue.len())
            .field("transport", &self.transport)
            .finish()
    }
}

impl BankClient {
    pub fn builder(credentials: Credentials) -> ClientBuilder {
        ClientBuilder::new(credentials)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoints(&self) -> &EndpointCatalog {
        &self.endpoints
    }

    pub fn default_headers(&self) -> &Headers {
        &self.default_headers
    }

    /// Base URL relative endpoints resolve against: the selected catalog
    /// entry, else `base_uri` when set.
    pub fn current_endpoint(&self) -> Option<&str> {
        self.current_endpoint
            .as_deref()
            .and_then(|name| self.endpoints.get(name))
            .or_else(|| Some(self.active.base_uri.as_str()).filter(|uri| !uri.is_empty()))
    }

    /// Select the catalog entry `name` as the current endpoint.
    pub fn select_endpoint(&mut self, name: &str) -> Result<&mut Self> {
        self.endpoints.require(name)?;
        self.current_endpoint = Some(name.to_string());
        Ok(self)
    }

    /// Register a decoder for [`ResponseType::Custom`](crate::ResponseType::Custom).
    pub fn register_decoder<F>(&mut self, name: &str, decoder: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<Body> + Send + Sync + 'static,
    {
        self.decoders.register(name, decoder);
        self
    }

    // Configuration

    /// The configuration in effect.
    pub fn get_configuration(&self) -> &Config {
        &self.active
    }

    /// The configuration restored after each request.
    pub fn baseline_configuration(&self) -> &Config {
        &self.baseline
    }

    /// Apply `overrides` on top of the baseline until the next request
    /// completes.
    ///
    /// When an earlier override is still in effect and the new result
    /// differs from it, that earlier configuration becomes the baseline the
    /// next request restores.
    pub fn set_configuration(&mut self, overrides: &ConfigOverrides) -> Result<&mut Self> {
        if overrides.is_empty() && self.active == self.baseline {
            return Ok(self);
        }

        let merged = merge(&self.baseline, overrides);
        if merged != self.active && self.active != self.baseline {
            debug!("Keeping previous configuration as the restore point");
            self.baseline = std::mem::replace(&mut self.active, merged);
        } else {
            self.active = merged;
        }
        self.ensure_transport(false)?;
        Ok(self)
    }

    /// Apply `overrides` to the baseline itself.
    pub fn set_global_configuration(&mut self, overrides: &ConfigOverrides) -> Result<&mut Self> {
        self.baseline = merge(&self.baseline, overrides);
        self.active = self.baseline.clone();
        self.ensure_transport(false)?;
        Ok(self)
    }

    /// Put the baseline back in effect.
    fn restore(&mut self) -> Result<()> {
        if self.active != self.baseline {
            debug!("Restoring baseline configuration");
            self.active = self.baseline.clone();
            self.ensure_transport(false)?;
        }
        Ok(())
    }

    /// Rebuild the default transport when `force` is set or its settings no
    /// longer match the active configuration. Caller transports are kept.
    pub fn ensure_transport(&mut self, force: bool) -> Result<()> {
        if let TransportHandle::Managed(ref current) = self.transport {
            let settings = self.active.transport_settings();
            if force || *current.settings() != settings {
                debug!(force, "Rebuilding transport");
                self.transport = TransportHandle::Managed(Arc::new(ReqwestTransport::new(settings)?));
            }
        }
        Ok(())
    }

    /// Redirects followed by the last request sent outside a batch. Empty
    /// unless `track_redirects` was on for that request.
    ///
    /// Failing responses also carry the history in their
    /// [`REDIRECT_HISTORY_HEADER`](crate::REDIRECT_HISTORY_HEADER) and
    /// [`REDIRECT_STATUS_HISTORY_HEADER`](crate::REDIRECT_STATUS_HISTORY_HEADER)
    /// headers.
    pub fn last_redirects(&self) -> &Redirects {
        &self.last_redirects
    }

    // Authentication

    /// `Basic` value for the token endpoint.
    pub fn basic_authorization(&self) -> String {
        self.credentials.basic_authorization()
    }

    /// Cached token, without any network call.
    pub fn token(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }

    /// `Authorization` value for API calls, fetching a token when none is
    /// cached.
    ///
    /// An empty string is returned when the token endpoint yields no usable
    /// token, so the API rejects the call and the retry path takes over.
    pub async fn bearer_authorization(&mut self) -> Result<String> {
        match self.get_auth_token(false).await {
            Ok(token) => Ok(token.authorization()),
            Err(e) if e.is_auth_token_error() => {
                warn!(error = %e, "No usable auth token, sending request without one");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Return the cached token, or fetch a new one when `force` is set or
    /// nothing is cached.
    #[instrument(skip(self))]
    pub async fn get_auth_token(&mut self, force: bool) -> Result<AuthToken> {
        if !force {
            if let Some(ref token) = self.token {
                return Ok(token.clone());
            }
        }

        let token = self.fetch_token().await?;
        debug!(expires_in = token.expires_in, "Auth token acquired");
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Client-credentials grant, sent once without the retry loop.
    async fn fetch_token(&self) -> Result<AuthToken> {
        let base = self.endpoints.require(TOKEN_ENDPOINT)?;
        let auth_headers = Headers::new()
            .with("Accept", "application/json")
            .with(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .with(AUTHORIZATION, self.basic_authorization());

        let request = RequestBuilder::new(Method::Post, TOKEN_PATH, Some(base))
            .headers(&self.default_headers, &auth_headers)
            .parameters(Parameters::Raw("grant_type=client_credentials".to_string()))
            .build()?;

        debug!(url = %request.url, "Requesting auth token");
        let response = self.transport.shared().send(request).await?;
        if response.is_failure() {
            info!(status = response.status, "Token endpoint returned an error");
        }
        AuthToken::from_response_body(response.status, &response.body)
    }

    // Dispatch

    /// Send `call`, retrying retryable failures with a fresh token.
    ///
    /// In queueing mode the request is built and buffered instead. Either
    /// way the baseline configuration is back in effect afterwards.
    #[instrument(skip(self, call), fields(method = %call.method, endpoint = %call.endpoint))]
    pub async fn request(&mut self, call: ApiCall) -> Result<Reply> {
        let outcome = self.dispatch(&call).await;
        let restored = self.restore();
        let reply = outcome?;
        restored?;
        Ok(reply)
    }

    /// [`request`](Self::request) with one-shot configuration overrides.
    pub async fn request_with(
        &mut self,
        call: ApiCall,
        overrides: &ConfigOverrides,
    ) -> Result<Reply> {
        if let Err(e) = self.set_configuration(overrides) {
            self.restore()?;
            return Err(e);
        }
        self.request(call).await
    }

    async fn dispatch(&mut self, call: &ApiCall) -> Result<Reply> {
        ensure_supported(&call.response_type, &self.decoders)?;

        if self.queue.is_active() {
            let request = self.build_request(call).await?;
            let ticket = self.queue.push(request, call.response_type.clone());
            debug!(%ticket, pending = self.queue.len(), "Request queued");
            return Ok(Reply::Queued(ticket));
        }

        self.last_redirects = Redirects::default();
        let mut state = RetryState::from_config(&self.active);

        loop {
            let request = self.build_request(call).await?;
            debug!(url = %request.url, "Sending request");
            let response = self.transport.shared().send(request).await?;
            let status = response.status;
            self.last_redirects = response.redirects();

            if !response.is_failure() {
                debug!(status, "Response received");
                let body = translate(&response.body, &call.response_type, &self.decoders)?;
                return Ok(Reply::Ready(Ok(body)));
            }

            info!(status, "Non-success response");

            match state.on_failure(status) {
                RetryDecision::Retry(next) => {
                    warn!(
                        attempt = next.attempts(),
                        bound = ?next.bound(),
                        status,
                        "Request failed, refreshing auth token and retrying"
                    );
                    self.refresh_token().await?;
                    state = next;
                }
                RetryDecision::GiveUp { attempts } => {
                    debug!(attempts, status, "Giving up on request");
                    return Ok(Reply::Ready(Err(ApiFailure::from(response))));
                }
            }
        }
    }

    /// Forced refresh between retries. A refused refresh leaves no token
    /// cached so the next attempt asks again.
    async fn refresh_token(&mut self) -> Result<()> {
        match self.get_auth_token(true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_auth_token_error() => {
                warn!(error = %e, "Auth token refresh failed");
                self.token = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn build_request(&mut self, call: &ApiCall) -> Result<PendingRequest> {
        let current = self.current_endpoint().map(str::to_string);
        let mut builder = RequestBuilder::new(call.method, &call.endpoint, current.as_deref())
            .headers(&self.default_headers, &call.headers)
            .parameters(call.parameters.clone());

        if builder.needs_authorization() {
            let authorization = self.bearer_authorization().await?;
            builder = builder.authorize(authorization);
        }

        builder.build()
    }

    // Batching

    /// Buffer subsequent requests until [`flush`](Self::flush).
    pub fn queue(&mut self) -> &mut Self {
        self.queue.start();
        self
    }

    pub fn is_queueing(&self) -> bool {
        self.queue.is_active()
    }

    /// Number of buffered requests.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Send up to `limit` buffered requests (all of them for `None` or
    /// `Some(0)`) and leave queueing mode.
    ///
    /// Slots are in submission order. Batched requests are not retried.
    #[instrument(skip(self))]
    pub async fn flush(&mut self, limit: Option<usize>) -> Vec<Result<ApiResult>> {
        let batch = self.queue.drain(limit);
        if batch.is_empty() {
            return Vec::new();
        }

        queue::dispatch(
            self.transport.shared(),
            batch,
            self.active.batch_concurrency,
            &self.decoders,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::response::ResponseType;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str) -> serde_json::Value {
        json!({"access_token": token, "token_type": "Bearer", "expires_in": 3600})
    }

    async fn mount_token(server: &MockServer, token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/connect/token"))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(token)))
            .expect(times)
            .mount(server)
            .await;
    }

    fn builder(server: &MockServer) -> ClientBuilder {
        BankClient::builder(Credentials::new("id", "sec"))
            .with_endpoints(
                EndpointCatalog::new()
                    .with(TOKEN_ENDPOINT, format!("{}/auth/", server.uri()))
                    .with("bank", format!("{}/bank/", server.uri())),
            )
            .with_current_endpoint("bank")
    }

    #[tokio::test]
    async fn test_lazy_token_then_cached() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/bank/Accounts"))
            .and(header("Authorization", "Bearer tok-1"))
            .and(query_param("index", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        assert!(client.token().is_none());

        for _ in 0..2 {
            let reply = client
                .request(ApiCall::get("Accounts").with_parameters(
                    json!({"index": 0}).as_object().cloned().unwrap(),
                ))
                .await
                .unwrap();
            let body = reply.into_result().unwrap().unwrap();
            assert_eq!(body.as_json().unwrap()["items"], json!([]));
        }
    }

    #[tokio::test]
    async fn test_token_request_uses_basic_auth() {
        let server = MockServer::start().await;
        let client = builder(&server).build().await.unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/connect/token"))
            .and(header("Authorization", client.basic_authorization().as_str()))
            .and(header("Content-Type", FORM_CONTENT_TYPE))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok")))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client;
        let token = client.get_auth_token(false).await.unwrap();
        assert_eq!(token.authorization(), "Bearer tok");
    }

    #[tokio::test]
    async fn test_retry_refreshes_token() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh", 2).await;

        Mock::given(method("GET"))
            .and(path("/bank/Customers"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bank/Customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        let reply = client.request(ApiCall::get("Customers")).await.unwrap();
        assert!(reply.into_result().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_returned() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;

        Mock::given(method("GET"))
            .and(path("/bank/Accounts/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such account"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        let failure = client
            .request(ApiCall::get("Accounts/missing"))
            .await
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap_err();
        assert_eq!(failure.status, 404);
        assert_eq!(failure.text(), "no such account");
    }

    #[tokio::test]
    async fn test_auth_init_fetches_at_build() {
        let server = MockServer::start().await;
        mount_token(&server, "eager", 1).await;

        let client = builder(&server)
            .with_config(Config::overrides().with_auth_init(true))
            .build()
            .await
            .unwrap();
        assert_eq!(client.token().unwrap().access_token, "eager");
    }

    #[tokio::test]
    async fn test_unusable_token_sends_empty_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/connect/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bank/Accounts"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = builder(&server)
            .with_config(Config::overrides().with_auth_retries(0))
            .build()
            .await
            .unwrap();
        let failure = client
            .request(ApiCall::get("Accounts"))
            .await
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap_err();
        assert_eq!(failure.status, 401);
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_missing_token_endpoint_is_config_error() {
        let err = BankClient::builder(Credentials::new("id", "sec"))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_current_endpoint_is_config_error() {
        let server = MockServer::start().await;
        let err = builder(&server)
            .with_current_endpoint("cards")
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Config(_)));
    }

    #[tokio::test]
    async fn test_unsupported_response_type_before_io() {
        let server = MockServer::start().await;
        let mut client = builder(&server).build().await.unwrap();

        let err = client
            .request(ApiCall::get("Accounts").with_response_type("xml"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedResponseType(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_decoder_and_raw() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        Mock::given(method("GET"))
            .and(path("/bank/Statement"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a;b;c"))
            .mount(&server)
            .await;

        let mut client = builder(&server)
            .with_decoder("csv", |body| {
                Ok(Body::Json(json!(String::from_utf8_lossy(body)
                    .split(';')
                    .collect::<Vec<_>>())))
            })
            .build()
            .await
            .unwrap();

        let body = client
            .request(ApiCall::get("Statement").with_response_type("CSV"))
            .await
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(body, Body::Json(json!(["a", "b", "c"])));

        let raw = client
            .request(ApiCall::get("Statement").with_response_type(ResponseType::Raw))
            .await
            .unwrap()
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(raw.as_bytes(), b"a;b;c");
    }

    #[tokio::test]
    async fn test_request_with_restores_baseline() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        Mock::given(method("GET"))
            .and(path("/bank/Accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        let baseline = client.get_configuration().clone();

        client
            .request_with(
                ApiCall::get("Accounts"),
                &Config::overrides().with_auth_retries(7).with_max_redirects(1),
            )
            .await
            .unwrap();

        assert_eq!(client.get_configuration(), &baseline);
        assert_eq!(client.get_configuration(), client.baseline_configuration());
    }

    #[tokio::test]
    async fn test_global_configuration_survives_requests() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        Mock::given(method("GET"))
            .and(path("/bank/Accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        client
            .set_global_configuration(&Config::overrides().with_batch_concurrency(4))
            .unwrap();
        client.request(ApiCall::get("Accounts")).await.unwrap();

        assert_eq!(client.get_configuration().batch_concurrency, 4);
    }

    #[tokio::test]
    async fn test_select_endpoint() {
        let server = MockServer::start().await;
        let mut client = builder(&server).build().await.unwrap();

        assert!(client.select_endpoint("nope").is_err());
        client.select_endpoint(TOKEN_ENDPOINT).unwrap();
        assert_eq!(
            client.current_endpoint(),
            Some(format!("{}/auth/", server.uri()).as_str())
        );
    }

    fn managed(client: &BankClient) -> Arc<ReqwestTransport> {
        match client.transport {
            TransportHandle::Managed(ref transport) => Arc::clone(transport),
            TransportHandle::Custom(_) => panic!("expected the default transport"),
        }
    }

    async fn mount_redirect_chain(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/bank/hop1"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/bank/hop2"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bank/hop2"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/bank/done"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bank/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_transport_follows_redirect_limit_overrides() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        mount_redirect_chain(&server).await;

        let mut client = builder(&server).build().await.unwrap();

        let err = client
            .request_with(ApiCall::get("hop1"), &Config::overrides().with_max_redirects(1))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TooManyRedirects { max: 1 }));
        assert_eq!(managed(&client).settings().max_redirects, 5);

        let reply = client.request(ApiCall::get("hop1")).await.unwrap();
        let body = reply.into_result().unwrap().unwrap();
        assert_eq!(body.as_json().unwrap()["done"], true);
    }

    #[tokio::test]
    async fn test_transport_kept_when_settings_unchanged() {
        let server = MockServer::start().await;
        let mut client = builder(&server).build().await.unwrap();
        let original = managed(&client);

        client.set_configuration(&ConfigOverrides::default()).unwrap();
        assert!(Arc::ptr_eq(&original, &managed(&client)));

        client
            .set_configuration(&Config::overrides().with_auth_retries(3))
            .unwrap();
        assert!(Arc::ptr_eq(&original, &managed(&client)));

        client
            .set_configuration(&Config::overrides().with_max_redirects(2))
            .unwrap();
        assert!(!Arc::ptr_eq(&original, &managed(&client)));
        assert_eq!(managed(&client).settings().max_redirects, 2);

        let current = managed(&client);
        client.ensure_transport(true).unwrap();
        assert!(!Arc::ptr_eq(&current, &managed(&client)));
    }

    struct FixedTransport;

    #[async_trait::async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, _request: PendingRequest) -> Result<crate::RawResponse> {
            Ok(crate::RawResponse::new(200, token_body("fixed").to_string()))
        }
    }

    #[tokio::test]
    async fn test_custom_transport_is_never_replaced() {
        let custom: Arc<dyn Transport> = Arc::new(FixedTransport);
        let mut client = BankClient::builder(Credentials::new("id", "sec"))
            .with_endpoints(EndpointCatalog::new().with(TOKEN_ENDPOINT, "https://auth.test/"))
            .with_transport(Arc::clone(&custom))
            .build()
            .await
            .unwrap();

        client
            .set_global_configuration(&Config::overrides().with_max_redirects(1))
            .unwrap();
        client
            .set_configuration(&Config::overrides().with_timeout(std::time::Duration::from_secs(1)))
            .unwrap();
        client.ensure_transport(true).unwrap();

        match client.transport {
            TransportHandle::Custom(ref transport) => assert!(Arc::ptr_eq(transport, &custom)),
            TransportHandle::Managed(_) => panic!("caller transport was replaced"),
        }
    }

    #[tokio::test]
    async fn test_request_reports_tracked_redirects() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        mount_redirect_chain(&server).await;

        let mut client = builder(&server).build().await.unwrap();
        let tracked = Config::overrides().with_track_redirects(true);

        client
            .request_with(ApiCall::get("hop1"), &tracked)
            .await
            .unwrap();
        let redirects = client.last_redirects();
        assert_eq!(
            redirects.urls,
            vec![
                format!("{}/bank/hop2", server.uri()),
                format!("{}/bank/done", server.uri()),
            ]
        );
        assert_eq!(redirects.statuses, vec![302, 301]);

        client.request(ApiCall::get("hop1")).await.unwrap();
        assert!(client.last_redirects().is_empty());
    }

    #[tokio::test]
    async fn test_failure_carries_redirect_headers() {
        let server = MockServer::start().await;
        mount_token(&server, "tok", 1).await;
        Mock::given(method("GET"))
            .and(path("/bank/moved"))
            .respond_with(ResponseTemplate::new(307).insert_header("Location", "/bank/gone"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bank/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut client = builder(&server).build().await.unwrap();
        let reply = client
            .request_with(
                ApiCall::get("moved"),
                &Config::overrides().with_track_redirects(true),
            )
            .await
            .unwrap();

        let failure = reply.into_result().unwrap().unwrap_err();
        assert_eq!(failure.status, 404);
        assert_eq!(
            failure.headers.get(crate::REDIRECT_HISTORY_HEADER),
            Some(format!("{}/bank/gone", server.uri()).as_str())
        );
        assert_eq!(failure.headers.get(crate::REDIRECT_STATUS_HISTORY_HEADER), Some("307"));
    }
}
