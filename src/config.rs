use url::Url;

use crate::error::GeneralError;
use crate::types::SameSite;

/// Core address used when no host list is configured.
pub const DEFAULT_CORE_HOST: &str = "http://localhost:3567";

/// Session SDK configuration.
///
/// ```rust,ignore
/// use session_sdk::SessionConfig;
///
/// let config = SessionConfig::new("http://core-1:3567;http://core-2:3567")?
///     .with_api_key("secret")
///     .with_cookie_same_site(SameSite::Lax);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) hosts: Vec<Url>,
    pub(crate) api_key: Option<String>,
    pub(crate) cookie_domain: Option<String>,
    pub(crate) cookie_secure: Option<bool>,
    pub(crate) cookie_same_site: Option<SameSite>,
    pub(crate) access_token_path: Option<String>,
    pub(crate) refresh_api_path: Option<String>,
    pub(crate) testing: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hosts: parse_hosts(DEFAULT_CORE_HOST).unwrap_or_default(),
            api_key: None,
            cookie_domain: None,
            cookie_secure: None,
            cookie_same_site: None,
            access_token_path: None,
            refresh_api_path: None,
            testing: false,
        }
    }
}

impl SessionConfig {
    /// Create a configuration from a semicolon-delimited host list.
    ///
    /// Each entry is either `host:port` (plain HTTP implied) or a full URL.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::Config`] if an entry is not a valid URL or the list is empty.
    pub fn new(hosts: &str) -> Result<Self, GeneralError> {
        let hosts = parse_hosts(hosts)?;
        if hosts.is_empty() {
            return Err(GeneralError::Config("host list is empty".into()));
        }
        Ok(Self {
            hosts,
            ..Self::default()
        })
    }

    /// Create configuration from environment variables.
    ///
    /// # Optional env vars
    /// - `SESSION_CORE_HOSTS`: semicolon-delimited core hosts (default `http://localhost:3567`)
    /// - `SESSION_CORE_API_KEY`: API key sent to the core
    /// - `SESSION_COOKIE_DOMAIN`: override the cookie domain
    /// - `SESSION_COOKIE_SECURE`: `"1"`/`"true"` or `"0"`/`"false"`
    /// - `SESSION_COOKIE_SAME_SITE`: `none`, `lax` or `strict`
    /// - `SESSION_ACCESS_TOKEN_PATH`: override the access-token cookie path
    /// - `SESSION_REFRESH_API_PATH`: override the refresh endpoint path
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::Config`] if a host or boolean is invalid.
    pub fn from_env() -> Result<Self, GeneralError> {
        let mut config = match std::env::var("SESSION_CORE_HOSTS") {
            Ok(hosts) => Self::new(&hosts)?,
            Err(_) => Self::default(),
        };

        if let Ok(key) = std::env::var("SESSION_CORE_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(domain) = std::env::var("SESSION_COOKIE_DOMAIN") {
            config = config.with_cookie_domain(domain);
        }
        if let Ok(secure) = std::env::var("SESSION_COOKIE_SECURE") {
            config = config.with_cookie_secure(parse_bool("SESSION_COOKIE_SECURE", &secure)?);
        }
        if let Ok(same_site) = std::env::var("SESSION_COOKIE_SAME_SITE") {
            config = config.with_cookie_same_site(same_site.parse().unwrap_or_default());
        }
        if let Ok(path) = std::env::var("SESSION_ACCESS_TOKEN_PATH") {
            config = config.with_access_token_path(path);
        }
        if let Ok(path) = std::env::var("SESSION_REFRESH_API_PATH") {
            config = config.with_refresh_api_path(path);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = Some(secure);
        self
    }

    #[must_use]
    pub fn with_cookie_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie_same_site = Some(same_site);
        self
    }

    #[must_use]
    pub fn with_access_token_path(mut self, path: impl Into<String>) -> Self {
        self.access_token_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_refresh_api_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_api_path = Some(path.into());
        self
    }

    /// Record diagnostics (alive hosts, process events) for test assertions.
    #[must_use]
    pub fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    /// Normalized core base URLs, in round-robin order.
    #[must_use]
    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    #[must_use]
    pub fn cookie_secure(&self) -> Option<bool> {
        self.cookie_secure
    }

    #[must_use]
    pub fn cookie_same_site(&self) -> Option<SameSite> {
        self.cookie_same_site
    }

    #[must_use]
    pub fn access_token_path(&self) -> Option<&str> {
        self.access_token_path.as_deref()
    }

    #[must_use]
    pub fn refresh_api_path(&self) -> Option<&str> {
        self.refresh_api_path.as_deref()
    }

    #[must_use]
    pub fn is_testing(&self) -> bool {
        self.testing
    }
}

fn parse_hosts(hosts: &str) -> Result<Vec<Url>, GeneralError> {
    hosts
        .split(';')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| {
            let h = h.trim_end_matches('/');
            let candidate = if h.contains("://") {
                h.to_string()
            } else {
                format!("http://{h}")
            };
            Url::parse(&candidate).map_err(|e| GeneralError::Config(format!("host {h:?}: {e}")))
        })
        .collect()
}

fn parse_bool(name: &str, value: &str) -> Result<bool, GeneralError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(GeneralError::Config(format!("{name}: expected a boolean, got {other:?}"))),
    }
}

/// Base URL without the trailing slash `Url` always renders for an empty path.
pub(crate) fn host_base(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}
