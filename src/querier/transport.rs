use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;

use crate::error::GeneralError;

/// Upper bound for connecting to a core host.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for a whole request/response exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CDI_VERSION_HEADER: &str = "cdi-version";
const API_KEY_HEADER: &str = "api-key";

/// HTTP method of a core request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Delete => Self::DELETE,
        }
    }
}

/// One request to the core, independent of the host it is sent to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreRequest<'a> {
    pub(crate) method: Method,
    pub(crate) path: &'a str,
    pub(crate) query: &'a [(&'a str, &'a str)],
    pub(crate) body: Option<&'a JsonValue>,
}

impl<'a> CoreRequest<'a> {
    pub(crate) fn get(path: &'a str, query: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            method: Method::Get,
            path,
            query,
            body: None,
        }
    }

    pub(crate) fn with_body(method: Method, path: &'a str, body: &'a JsonValue) -> Self {
        Self {
            method,
            path,
            query: &[],
            body: Some(body),
        }
    }
}

/// Outcome of a single attempt against one host.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    /// The host could not be reached; another host may answer.
    #[error("Could not connect to {host}: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: reqwest::Error,
    },
    /// Any other failure; retrying elsewhere would not help.
    #[error(transparent)]
    Fatal(#[from] GeneralError),
}

/// Executes single HTTP exchanges with the core.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl Transport {
    /// Build a transport with the fixed connect/request timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::Http`] if the HTTP client cannot be built.
    pub fn new(api_key: Option<String>) -> Result<Self, GeneralError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, api_key })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Send `request` to `host` and parse the response body.
    ///
    /// A successful body that is not JSON is returned as a JSON string.
    pub(crate) async fn send(
        &self,
        host: &str,
        request: &CoreRequest<'_>,
        cdi_version: Option<&str>,
    ) -> Result<JsonValue, TransportError> {
        let url = format!("{host}{}", request.path);
        let mut builder = self.http.request(request.method.into(), &url);

        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        if let Some(version) = cdi_version {
            builder = builder.header(CDI_VERSION_HEADER, version);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        if let Some(body) = request.body {
            let bytes = serde_json::to_vec(body).map_err(GeneralError::from)?;
            builder = builder
                .header(CONTENT_TYPE, "application/json; charset=UTF-8")
                .body(bytes);
        }

        let response = builder.send().await.map_err(|e| classify(host, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| classify(host, e))?;

        if status.is_client_error() || status.is_server_error() {
            return Err(GeneralError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        Ok(serde_json::from_str(&text).unwrap_or(JsonValue::String(text)))
    }
}

fn classify(host: &str, e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Unreachable {
            host: host.to_string(),
            source: e,
        }
    } else {
        TransportError::Fatal(GeneralError::Http(e))
    }
}
