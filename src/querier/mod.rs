//! Multi-host client for the core service.
//!
//! Requests go to hosts in round-robin order. A host that refuses the connection is
//! skipped and the next one tried, at most once per configured host. The wire-protocol
//! (CDI) version is negotiated on first use and cached.

mod transport;
pub mod version;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use url::Url;

use crate::config::{SessionConfig, host_base};
use crate::device_info::FrontendSdkRegistry;
use crate::error::{Error, GeneralError};
use crate::types::Device;

pub use transport::{CONNECT_TIMEOUT, Method, REQUEST_TIMEOUT, Transport};
pub(crate) use transport::{CoreRequest, TransportError};

/// CDI versions this SDK can speak.
pub const SUPPORTED_CDI_VERSIONS: &[&str] = &["2.0"];

/// Name this SDK reports as its driver identity.
pub const DRIVER_NAME: &str = env!("CARGO_PKG_NAME");
/// Version this SDK reports as its driver identity.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const API_VERSION_PATH: &str = "/apiversion";

/// Paths whose request bodies carry frontend SDK and driver identity.
const SESSION_AFFECTING_PATHS: [&str; 4] =
    ["/session", "/session/verify", "/session/refresh", "/handshake"];

#[derive(Debug, Deserialize)]
struct ApiVersionResponse {
    versions: Vec<String>,
}

/// Round-robin, retrying client for the core service.
pub struct Querier {
    hosts: Vec<Url>,
    transport: Transport,
    frontend_sdks: Arc<FrontendSdkRegistry>,
    next_index: AtomicUsize,
    api_version: RwLock<Option<String>>,
    api_version_init: tokio::sync::Mutex<()>,
    testing: bool,
    hosts_alive: Mutex<HashSet<String>>,
}

impl Querier {
    /// Create a querier for the hosts in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::Config`] if no host is configured, or
    /// [`GeneralError::Http`] if the HTTP client cannot be built.
    pub fn new(
        config: &SessionConfig,
        frontend_sdks: Arc<FrontendSdkRegistry>,
    ) -> Result<Self, GeneralError> {
        if config.hosts().is_empty() {
            return Err(GeneralError::Config("no core host configured".into()));
        }
        let transport = Transport::new(config.api_key().map(str::to_string))?;
        Ok(Self {
            hosts: config.hosts().to_vec(),
            transport,
            frontend_sdks,
            next_index: AtomicUsize::new(0),
            api_version: RwLock::new(None),
            api_version_init: tokio::sync::Mutex::new(()),
            testing: config.is_testing(),
            hosts_alive: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the transport (custom HTTP client, proxies, TLS roots).
    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// The negotiated CDI version, negotiating it on first call.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::IncompatibleCore`] if the core and this SDK share no
    /// version, or any error from reaching the core.
    pub async fn api_version(&self) -> Result<String, Error> {
        let cached = self.api_version.read().clone();
        if let Some(version) = cached {
            return Ok(version);
        }

        let _init = self.api_version_init.lock().await;
        let cached = self.api_version.read().clone();
        if let Some(version) = cached {
            return Ok(version);
        }

        let response = self
            .send_with_retries(&CoreRequest::get(API_VERSION_PATH, &[]), None)
            .await?;
        let response: ApiVersionResponse = decode(API_VERSION_PATH, response)?;

        let version = version::largest_common_version(&response.versions, SUPPORTED_CDI_VERSIONS)
            .map(str::to_string)
            .ok_or_else(|| GeneralError::IncompatibleCore {
                server_versions: response.versions.clone(),
                sdk_versions: SUPPORTED_CDI_VERSIONS.iter().map(|v| v.to_string()).collect(),
            })?;

        tracing::info!(cdi_version = %version, "Negotiated core API version");
        *self.api_version.write() = Some(version.clone());
        Ok(version)
    }

    /// GET `path` with URL-encoded query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] when no host answers, the core returns an error status,
    /// or the response does not match `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Error> {
        let version = self.api_version().await?;
        let response = self
            .send_with_retries(&CoreRequest::get(path, params), Some(&version))
            .await?;
        decode(path, response)
    }

    /// POST a JSON body to `path`.
    ///
    /// # Errors
    ///
    /// See [`Querier::get`].
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: JsonValue) -> Result<T, Error> {
        self.send_json(Method::Post, path, body).await
    }

    /// PUT a JSON body to `path`.
    ///
    /// # Errors
    ///
    /// See [`Querier::get`].
    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: JsonValue) -> Result<T, Error> {
        self.send_json(Method::Put, path, body).await
    }

    /// DELETE `path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`Querier::get`].
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        body: JsonValue,
    ) -> Result<T, Error> {
        self.send_json(Method::Delete, path, body).await
    }

    /// Hosts that have answered at least once. Only populated in testing mode.
    #[must_use]
    pub fn hosts_alive_for_testing(&self) -> HashSet<String> {
        self.hosts_alive.lock().clone()
    }

    /// Forget the negotiated CDI version and alive hosts. Intended for test harnesses.
    pub fn reset(&self) {
        *self.api_version.write() = None;
        self.hosts_alive.lock().clear();
        self.next_index.store(0, Ordering::Relaxed);
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut body: JsonValue,
    ) -> Result<T, Error> {
        if method == Method::Post && SESSION_AFFECTING_PATHS.contains(&path) {
            self.attach_client_metadata(&mut body);
        }
        let version = self.api_version().await?;
        let response = self
            .send_with_retries(&CoreRequest::with_body(method, path, &body), Some(&version))
            .await?;
        decode(path, response)
    }

    fn attach_client_metadata(&self, body: &mut JsonValue) {
        if let JsonValue::Object(map) = body {
            map.insert("frontendSDK".into(), json!(self.frontend_sdks.frontend_sdks()));
            map.insert("driver".into(), json!(Device::new(DRIVER_NAME, DRIVER_VERSION)));
        }
    }

    /// Index of the host to try next; advances the shared cursor.
    fn next_host(&self) -> &Url {
        let count = self.hosts.len();
        let index = self
            .next_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % count))
            .unwrap_or(0);
        &self.hosts[index % count]
    }

    async fn send_with_retries(
        &self,
        request: &CoreRequest<'_>,
        cdi_version: Option<&str>,
    ) -> Result<JsonValue, Error> {
        for _ in 0..self.hosts.len() {
            let host = host_base(self.next_host());
            tracing::debug!(host, path = request.path, method = ?request.method, "Querying core");

            match self.transport.send(host, request, cdi_version).await {
                Ok(response) => {
                    if self.testing {
                        self.hosts_alive.lock().insert(host.to_string());
                    }
                    return Ok(response);
                }
                Err(TransportError::Unreachable { host, source }) => {
                    tracing::warn!(host = %host, error = %source, "Core host unreachable, trying next");
                }
                Err(TransportError::Fatal(e)) => return Err(e.into()),
            }
        }

        tracing::error!(hosts = self.hosts.len(), "Every core host is unreachable");
        Err(GeneralError::NoCoreAvailable.into())
    }
}

fn decode<T: DeserializeOwned>(path: &str, response: JsonValue) -> Result<T, Error> {
    serde_json::from_value(response)
        .map_err(|e| GeneralError::unexpected(path, e.to_string()).into())
}
