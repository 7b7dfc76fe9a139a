//! HTTP client for the remote people/licenses API.
//!
//! Every call, whatever its type, takes a slot from one shared semaphore
//! before touching the network and gives it back as soon as the response
//! body has been read. Retry sleeps happen outside the slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use licsync_core::{
    CallStats, Capacity, Entitlement, Identity, ObservedUser, RemoteError, RemoteResult,
    RemoteService, UpdateRecord,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::retry::Failure;

/// Longest slice of an error body quoted in error messages.
const BODY_EXCERPT: usize = 200;

/// Rate-limited client for the remote service.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    /// Configuration for the client.
    config: Arc<RemoteConfig>,
    /// Parsed API base.
    base: Url,
    /// HTTP client carrying the bearer token.
    http: reqwest::Client,
    /// Concurrency ceiling shared by all calls.
    gate: Arc<Semaphore>,
    /// Retries issued since construction.
    retries: Arc<AtomicU64>,
}

/// One page of `GET people`.
#[derive(Debug, Deserialize)]
struct PeoplePage {
    #[serde(default)]
    items: Vec<ObservedUser>,
}

/// Body of `GET licenses/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LicenseInfo {
    #[serde(default)]
    name: Option<String>,
    total_units: u64,
    consumed_units: u64,
}

impl RemoteClient {
    /// Create a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, no token can be
    /// resolved, or the HTTP client cannot be built.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        config.validate()?;
        let base = config.api_base()?;
        let token = config.resolve_token()?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::config_error(format!("invalid API token: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            gate: Arc::new(Semaphore::new(config.max_concurrent)),
            retries: Arc::new(AtomicU64::new(0)),
            config: Arc::new(config),
            base,
            http,
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Retries issued since the client was built.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Calls currently holding a concurrency slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.gate.available_permits())
    }

    /// Build `base/segment/segment...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, Failure> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                Failure::new(RemoteError::fatal(format!(
                    "base URL '{}' cannot carry a path",
                    self.base
                )))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// Send one request inside a concurrency slot and return the body of a
    /// successful response.
    async fn exchange(&self, request: RequestBuilder) -> std::result::Result<Vec<u8>, Failure> {
        let _permit = self.gate.acquire().await.map_err(|e| {
            Failure::new(RemoteError::fatal(format!("concurrency gate closed: {e}")))
        })?;

        let response = request.send().await.map_err(transport_failure)?;
        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Failure::new(status_error(status, &body)).with_retry_after(hint));
        }

        let body = response.bytes().await.map_err(transport_failure)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteService for RemoteClient {
    #[instrument(skip(self, identity), fields(identity = %identity))]
    async fn lookup_user(&self, identity: &Identity) -> RemoteResult<ObservedUser> {
        let page: PeoplePage = self
            .config
            .retry
            .run("lookup_user", &self.retries, || async move {
                let url = self.endpoint(&["people"])?;
                let request = self.http.get(url).query(&[("email", identity.as_str())]);
                decode(&self.exchange(request).await?)
            })
            .await?;

        page.items
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::not_found(identity.as_str()))
    }

    #[instrument(skip(self, record), fields(user = %record.label()))]
    async fn apply_update(&self, record: &UpdateRecord) -> RemoteResult<()> {
        let replacement = &record.replacement();
        let remote_id = record.user.remote_id.as_str();

        self.config
            .retry
            .run("apply_update", &self.retries, || async move {
                let url = self.endpoint(&["people", remote_id])?;
                self.exchange(self.http.put(url).json(replacement))
                    .await
                    .map(|_| ())
            })
            .await?;

        debug!(operations = record.operations.len(), "Update applied");
        Ok(())
    }

    #[instrument(skip(self, entitlement), fields(entitlement = %entitlement))]
    async fn get_capacity(&self, entitlement: &Entitlement) -> RemoteResult<Capacity> {
        let info: LicenseInfo = self
            .config
            .retry
            .run("get_capacity", &self.retries, || async move {
                let url = self.endpoint(&["licenses", entitlement.as_str()])?;
                decode(&self.exchange(self.http.get(url)).await?)
            })
            .await?;

        let capacity = Capacity::new(info.total_units, info.consumed_units);
        info!(
            name = info.name.as_deref().unwrap_or("-"),
            total = capacity.total,
            consumed = capacity.consumed,
            available = capacity.available(),
            "Fetched license capacity"
        );
        Ok(capacity)
    }

    fn stats(&self) -> CallStats {
        CallStats {
            retries: self.retries(),
            in_flight: self.in_flight(),
        }
    }
}

/// Decode a JSON body; a body that does not parse is a protocol error.
fn decode<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, Failure> {
    serde_json::from_slice(body)
        .map_err(|e| Failure::new(RemoteError::fatal(format!("undecodable response: {e}"))))
}

/// Classify a transport-level failure.
fn transport_failure(error: reqwest::Error) -> Failure {
    let error = if error.is_builder() || error.is_redirect() || error.is_decode() {
        RemoteError::fatal(error.to_string())
    } else {
        // timeouts, refused or reset connections, truncated bodies
        RemoteError::transient(error.to_string())
    };
    Failure::new(error)
}

/// Classify a non-success status.
fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    let detail = format!("{status}: {excerpt}");
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => RemoteError::transient(detail),
        _ => RemoteError::fatal(detail),
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
