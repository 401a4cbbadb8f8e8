//! Core-issued session configuration, fetched once and cached.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::querier::Querier;
use crate::token::now_millis;
use crate::types::SameSite;

const HANDSHAKE_PATH: &str = "/handshake";

/// Access-token signing key together with the instant it stops being trusted.
///
/// The two always travel together so a rotation can never pair a new key with a
/// stale expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub public_key: String,
    /// Epoch milliseconds.
    pub expiry: i64,
}

impl SigningKey {
    #[must_use]
    pub fn new(public_key: impl Into<String>, expiry: i64) -> Self {
        Self {
            public_key: public_key.into(),
            expiry,
        }
    }

    /// Whether local verification with this key may still be attempted.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.expiry > now_millis()
    }
}

/// Session settings announced by the core in its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HandshakeInfo {
    pub signing_key: SigningKey,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub access_token_path: String,
    pub refresh_token_path: String,
    pub id_refresh_token_path: String,
    pub enable_anti_csrf: bool,
    pub access_token_blacklisting_enabled: bool,
    pub cookie_same_site: SameSite,
    pub session_expired_status_code: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeResponse {
    jwt_signing_public_key: String,
    jwt_signing_public_key_expiry_time: i64,
    #[serde(default)]
    cookie_domain: Option<String>,
    cookie_secure: bool,
    access_token_path: String,
    refresh_token_path: String,
    #[serde(default = "default_id_refresh_token_path")]
    id_refresh_token_path: String,
    enable_anti_csrf: bool,
    access_token_blacklisting_enabled: bool,
    #[serde(default)]
    cookie_same_site: SameSite,
    #[serde(default = "default_session_expired_status_code")]
    session_expired_status_code: u16,
}

fn default_id_refresh_token_path() -> String {
    "/".to_string()
}

fn default_session_expired_status_code() -> u16 {
    401
}

impl From<HandshakeResponse> for HandshakeInfo {
    fn from(r: HandshakeResponse) -> Self {
        Self {
            signing_key: SigningKey::new(
                r.jwt_signing_public_key,
                r.jwt_signing_public_key_expiry_time,
            ),
            cookie_domain: r.cookie_domain,
            cookie_secure: r.cookie_secure,
            access_token_path: r.access_token_path,
            refresh_token_path: r.refresh_token_path,
            id_refresh_token_path: r.id_refresh_token_path,
            enable_anti_csrf: r.enable_anti_csrf,
            access_token_blacklisting_enabled: r.access_token_blacklisting_enabled,
            cookie_same_site: r.cookie_same_site,
            session_expired_status_code: r.session_expired_status_code,
        }
    }
}

/// Lazily fetched, process-wide [`HandshakeInfo`].
///
/// Readers get an immutable snapshot. Key rotations replace the snapshot whole, so a
/// reader never observes a key paired with another key's expiry.
pub struct HandshakeCache {
    querier: Arc<Querier>,
    current: RwLock<Option<Arc<HandshakeInfo>>>,
    init: tokio::sync::Mutex<()>,
}

impl HandshakeCache {
    #[must_use]
    pub fn new(querier: Arc<Querier>) -> Self {
        Self {
            querier,
            current: RwLock::new(None),
            init: tokio::sync::Mutex::new(()),
        }
    }

    /// The cached handshake, fetching it from the core on first use.
    ///
    /// Concurrent first callers share a single fetch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached or its answer is malformed.
    pub async fn get(&self) -> Result<Arc<HandshakeInfo>, Error> {
        let cached = self.current.read().clone();
        if let Some(info) = cached {
            return Ok(info);
        }

        let _init = self.init.lock().await;
        let cached = self.current.read().clone();
        if let Some(info) = cached {
            return Ok(info);
        }

        let response: HandshakeResponse = self.querier.post(HANDSHAKE_PATH, json!({})).await?;
        let info = Arc::new(HandshakeInfo::from(response));
        tracing::info!(
            anti_csrf = info.enable_anti_csrf,
            blacklisting = info.access_token_blacklisting_enabled,
            "Fetched core handshake"
        );
        *self.current.write() = Some(Arc::clone(&info));
        Ok(info)
    }

    /// Record a signing key rotated by the core.
    ///
    /// Does nothing before the first handshake; that fetch will carry the current key.
    pub async fn update_signing_key(&self, key: SigningKey) {
        let _init = self.init.lock().await;
        let mut current = self.current.write();
        let Some(info) = current.as_ref() else {
            return;
        };
        if info.signing_key == key {
            return;
        }

        tracing::debug!(expiry = key.expiry, "Signing key rotated");
        let mut next = HandshakeInfo::clone(info);
        next.signing_key = key;
        *current = Some(Arc::new(next));
    }

    /// Drop the cached handshake. Intended for test harnesses.
    pub fn reset(&self) {
        *self.current.write() = None;
    }
}
