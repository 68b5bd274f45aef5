//! Authenticated API client.
//!
//! Every call goes through [`ApiClient::send`], which attaches the current
//! access credential and recovers from a single expired-credential event:
//! on 401 it renews through the shared [`RefreshCoordinator`] and replays
//! the request exactly once.

use std::sync::Arc;

use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{
    AccessCredential, HttpRenewer, Notifier, RefreshCoordinator, RefreshError, RenewedTokens,
    SessionExpiryHandler, TokenRenewer, TokenStore, TracingNotifier,
};
use crate::config::Config;
use crate::routes::{normalize_path, path_matches, MemoryNavigator, Navigator};

use super::request::{ApiRequest, RequestBody};
use super::ApiError;

#[derive(Serialize)]
struct LogoutBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh: Option<&'a str>,
}

/// Result of a logout call. The local store is cleared either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    Acknowledged,
    Rejected(u16),
    Unreachable,
}

/// Wires the shared pieces together. Every collaborator defaults to a fresh
/// instance; pass existing ones to share them between clients.
pub struct ApiClientBuilder {
    config: Config,
    client: Option<Client>,
    store: Option<Arc<TokenStore>>,
    renewer: Option<Arc<dyn TokenRenewer>>,
    navigator: Option<Arc<dyn Navigator>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ApiClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            store: None,
            renewer: None,
            navigator: None,
            notifier: None,
        }
    }

    /// Use a custom HTTP client. It should keep a cookie store so the
    /// renewal session cookie survives between calls.
    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn renewer(mut self, renewer: Arc<dyn TokenRenewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let config = self.config;
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .cookie_store(true)
                .connect_timeout(config.connect_timeout())
                .timeout(config.request_timeout())
                .build()?,
        };

        let store = self.store.unwrap_or_default();
        let renewer = self.renewer.unwrap_or_else(|| {
            Arc::new(HttpRenewer::new(
                client.clone(),
                config.url_for(&config.endpoints.refresh),
                config.request_timeout(),
            ))
        });
        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(MemoryNavigator::new("/")));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        let refresher = RefreshCoordinator::new(Arc::clone(&store), renewer, config.refresh_cooldown());
        let expiry = SessionExpiryHandler::new(
            Arc::clone(&store),
            config.routes.clone(),
            navigator,
            notifier,
            config.expiry_redirect_delay(),
        );

        Ok(ApiClient {
            client,
            config: Arc::new(config),
            store,
            refresher: Arc::new(refresher),
            expiry: Arc::new(expiry),
        })
    }
}

/// API client for the gig marketplace backend.
/// Clone is cheap and clones share the credential store, the renewal slot
/// and the expiry guard.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<Config>,
    store: Arc<TokenStore>,
    refresher: Arc<RefreshCoordinator>,
    expiry: Arc<SessionExpiryHandler>,
}

impl ApiClient {
    /// Create a client with default collaborators
    pub fn new(config: Config) -> Result<Self, ApiError> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn expiry(&self) -> &SessionExpiryHandler {
        &self.expiry
    }

    // ===== Session Lifecycle =====

    /// Store a freshly issued credential pair, e.g. after a login form.
    pub fn establish_session(&self, access: impl Into<String>, refresh: Option<String>) {
        self.store.set_access(access);
        if let Some(refresh) = refresh {
            self.store.set_refresh(refresh);
        }
        info!("Session established");
    }

    /// Exchange login credentials for a token pair and store it.
    pub async fn obtain_token<B: Serialize + ?Sized>(&self, credentials: &B) -> Result<(), ApiError> {
        let request = ApiRequest::post(self.config.endpoints.token.clone()).json(credentials)?;
        let response = self.send(request).await?;
        let tokens: RenewedTokens = Self::parse_json(response, &self.config.endpoints.token).await?;
        self.establish_session(tokens.access, tokens.refresh);
        Ok(())
    }

    /// Renew the access credential now, joining any attempt in flight.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        self.refresher.refresh().await
    }

    /// Invalidate the session server-side, then clear local credentials
    /// whatever the server answered.
    pub async fn logout(&self) -> LogoutOutcome {
        let refresh = self.store.get_refresh();
        let body = LogoutBody {
            refresh: refresh.as_ref().map(|r| r.expose()),
        };

        let mut builder = self
            .client
            .post(self.config.url_for(&self.config.endpoints.logout))
            .timeout(self.config.request_timeout())
            .json(&body);
        if let Some(access) = self.store.get_access() {
            builder = builder.bearer_auth(access.expose());
        }

        let outcome = match builder.send().await {
            Ok(response) if response.status().is_success() => {
                info!("Logged out");
                LogoutOutcome::Acknowledged
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Logout rejected by server");
                LogoutOutcome::Rejected(response.status().as_u16())
            }
            Err(e) => {
                warn!(error = %e, "Logout request failed");
                LogoutOutcome::Unreachable
            }
        };

        self.store.clear();
        outcome
    }

    // ===== Request Pipeline =====

    /// Send a request, renewing and replaying it once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let anonymous = self.is_anonymous(&request.path);
        let sent = if anonymous {
            None
        } else {
            self.store.get_access()
        };

        let response = self.execute(&request, sent.as_ref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED && !anonymous {
            return self.recover(&request, sent).await;
        }
        self.check_response(response, anonymous).await
    }

    /// Second and last attempt for a request that got 401.
    async fn recover(
        &self,
        request: &ApiRequest,
        sent: Option<AccessCredential>,
    ) -> Result<Response, ApiError> {
        let current = self.store.get_access();
        if current.is_some() && current != sent {
            debug!(path = %request.path, "Credential already renewed, replaying");
        } else {
            debug!(path = %request.path, "Got 401, renewing credential");
            match self.refresher.refresh().await {
                Ok(()) => {}
                Err(RefreshError::SessionCleared) => {
                    // Logged out while waiting; that path already handled it.
                    debug!(path = %request.path, "Session ended during renewal, not replaying");
                    return Err(ApiError::Unauthorized);
                }
                Err(e) => {
                    warn!(path = %request.path, error = %e, "Renewal failed");
                    self.expiry.handle_session_expired();
                    return Err(ApiError::Unauthorized);
                }
            }
        }

        let replay = self
            .execute(request, self.store.get_access().as_ref())
            .await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Still unauthorized after renewal");
            self.expiry.handle_session_expired();
            return Err(ApiError::Unauthorized);
        }
        self.check_response(replay, false).await
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<Response, ApiError> {
        let url = self.config.url_for(&request.path);
        let timeout = request.timeout.unwrap_or_else(|| self.config.request_timeout());
        debug!(method = %request.method, url = %url, authenticated = credential.is_some(), "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(credential) = credential {
            builder = builder.bearer_auth(credential.expose());
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Bytes { data, content_type }) => builder
                .header(header::CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            None => builder,
        };

        Ok(builder.send().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(&self, response: Response, anonymous: bool) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::FORBIDDEN && !anonymous {
            self.expiry.handle_forbidden();
        }
        Err(ApiError::from_status(status, &body))
    }

    /// Endpoints where 401/403 is a business answer, not an expired session.
    pub fn is_anonymous(&self, path: &str) -> bool {
        let endpoint = self.endpoint_path(path);
        self.config
            .anonymous_endpoints
            .iter()
            .any(|p| endpoint_matches(&endpoint, p))
    }

    /// Path relative to the API base, for matching against endpoint tables.
    fn endpoint_path(&self, path: &str) -> String {
        let base = self.config.api_base_url.trim_end_matches('/');
        let relative = match path.strip_prefix(base) {
            Some(rest) => rest,
            None if path.starts_with("http://") || path.starts_with("https://") => {
                return reqwest::Url::parse(path)
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|_| path.to_string());
            }
            None => path,
        };
        let normalized = normalize_path(relative);
        if normalized.starts_with('/') {
            normalized.to_string()
        } else {
            format!("/{}", normalized)
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    // ===== Typed Helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::parse_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Self::parse_json(response, path).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::put(path).json(body)?).await?;
        Self::parse_json(response, path).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::patch(path).json(body)?).await?;
        Self::parse_json(response, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Upload a raw body with the longer upload timeout.
    pub async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Response, ApiError> {
        let request = ApiRequest::post(path)
            .bytes(data, content_type)
            .timeout(self.config.upload_timeout());
        self.send(request).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.api_base_url)
            .field("store", &self.store)
            .field("refresher", &self.refresher)
            .finish()
    }
}

/// Anonymous endpoint patterns match exactly; a trailing `*` opts into
/// matching the whole subtree.
fn endpoint_matches(endpoint: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path_matches(endpoint, prefix),
        None => endpoint == pattern,
    }
}
