//! Backend API client with transparent access token refresh.
//!
//! Every request carries the current bearer token when one exists. A 401 on
//! a regular endpoint triggers one coordinated refresh and a single resend;
//! a 401 on the refresh endpoint itself ends the session instead.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::auth::refresh::{DEFAULT_WAIT_TIMEOUT, RefreshCoordinator};
use crate::auth::store::TokenStore;
use crate::auth::types::{AccessToken, AccessTokenResponse};
use crate::config::ApiConfig;
use crate::error::{Error, RefreshError, Result};
use crate::net::client::HttpClient;

/// Endpoint that exchanges the refresh cookie for a new access token.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Callback run when a refresh fails in a way that ends the session.
pub type ExpiryHook = Arc<dyn Fn(&RefreshError) + Send + Sync>;

/// A 2xx response with its body already read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn text(&self) -> &str {
        &self.body
    }
}

/// HTTP client bound to one backend and one logical session.
///
/// Cheap to clone; clones share the token store, the refresh coordinator and
/// the cookie jar.
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    base_url: Arc<str>,
    store: Arc<TokenStore>,
    refresh: Arc<RefreshCoordinator>,
    expiry_hooks: Arc<RwLock<Vec<ExpiryHook>>>,
}

impl ApiClient {
    /// Create a client for `base_url` with default settings.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: &str) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Create a client from the `[api]` configuration section.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::builder(&config.base_url)
            .http(
                HttpClient::builder()
                    .connect_timeout(config.connect_timeout())
                    .request_timeout(config.request_timeout())
                    .build(),
            )
            .refresh_wait_timeout(config.refresh_wait_timeout())
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    /// Register a callback for refresh failures that end the session.
    ///
    /// Hooks run synchronously on the task whose request observed the
    /// failure, after the token store has been cleared.
    pub fn on_session_expired(&self, hook: impl Fn(&RefreshError) + Send + Sync + 'static) {
        self.expiry_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Send a request, refreshing the access token once on 401.
    #[instrument(skip(self, body))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let sent = self.store.token();
        let response = self.send(&method, path, body, sent.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read(response).await;
        }

        if path == REFRESH_PATH {
            debug!("Refresh endpoint rejected credentials, clearing token");
            self.store.clear();
            let err = RefreshError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            };
            self.notify_expired(&err);
            return Err(Error::Refresh(err));
        }

        // Someone else may already have refreshed while this request was out.
        let token = match self.store.token() {
            Some(current) if sent.as_ref() != Some(&current) => {
                debug!("Token changed during request, retrying without refresh");
                current
            }
            _ => self.refresh_session().await?,
        };

        let response = self.send(&method, path, body, Some(&token)).await?;
        read(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(path, Some(body)).await?.json()
    }

    /// POST with an optional JSON body, returning the raw response.
    pub async fn post<B>(&self, path: &str, body: Option<&B>) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        self.request(Method::POST, path, body.as_ref()).await
    }

    /// Obtain a new access token through the refresh coordinator.
    ///
    /// Concurrent callers share one refresh call. On a failure that ends the
    /// session the registered expiry hooks run before the error is returned.
    pub async fn refresh_session(&self) -> Result<AccessToken> {
        match self
            .refresh
            .obtain_refreshed_token(|| self.refresh_call())
            .await
        {
            Ok(token) => Ok(token),
            Err(err) => {
                if err.ends_session() {
                    self.notify_expired(&err);
                }
                Err(Error::Refresh(err))
            }
        }
    }

    async fn refresh_call(&self) -> std::result::Result<AccessToken, RefreshError> {
        debug!("Calling refresh endpoint");
        let response = self
            .http
            .inner()
            .post(self.url(REFRESH_PATH))
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: AccessTokenResponse =
            serde_json::from_str(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty access_token".into()));
        }
        Ok(AccessToken::new(parsed.access_token))
    }

    pub(crate) fn notify_expired(&self, err: &RefreshError) {
        let hooks = self
            .expiry_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        warn!(error = %err, hooks = hooks.len(), "Session expired");
        for hook in hooks {
            hook(err);
        }
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: Option<&AccessToken>,
    ) -> Result<reqwest::Response> {
        let mut req = self.http.inner().request(method.clone(), self.url(path));
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, token.bearer());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        debug!(path, authorized = token.is_some(), "Sending request");
        Ok(req.send().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("has_token", &self.store.has_token())
            .field("refresh", &self.refresh)
            .finish()
    }
}

/// Read the body and map non-2xx statuses to [`Error::Http`].
async fn read(response: reqwest::Response) -> Result<ApiResponse> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        debug!(status = status.as_u16(), "Request failed");
        return Err(Error::http(status.as_u16(), body));
    }
    Ok(ApiResponse {
        status: status.as_u16(),
        body,
    })
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    http: Option<HttpClient>,
    store: Option<Arc<TokenStore>>,
    refresh_wait_timeout: Duration,
}

impl ApiClientBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            http: None,
            store: None,
            refresh_wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn http(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Share an existing token store.
    pub fn store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresh_wait_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_wait_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid base URL '{}': {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base URL must be http or https: '{}'",
                self.base_url
            )));
        }

        let store = self.store.unwrap_or_default();
        let refresh = RefreshCoordinator::new(Arc::clone(&store))
            .with_wait_timeout(self.refresh_wait_timeout);

        Ok(ApiClient {
            http: self.http.unwrap_or_default(),
            base_url: self.base_url.trim_end_matches('/').into(),
            store,
            refresh: Arc::new(refresh),
            expiry_hooks: Arc::new(RwLock::new(Vec::new())),
        })
    }
}
