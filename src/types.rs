use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque, stable identity of a session on the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Application user identifier the session was created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cookie `SameSite` policy as announced by the core.
///
/// Anything other than `none` or `lax` is treated as `strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum SameSite {
    None,
    Lax,
    #[default]
    Strict,
}

impl From<String> for SameSite {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl std::str::FromStr for SameSite {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "lax" => Self::Lax,
            _ => Self::Strict,
        })
    }
}

impl std::fmt::Display for SameSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Lax => "lax",
            Self::Strict => "strict",
        })
    }
}

/// One token issued by the core, with the cookie attributes it must be stored under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TokenInfo {
    pub token: String,
    /// Epoch milliseconds.
    pub expiry: i64,
    /// Epoch milliseconds.
    pub created_time: i64,
    pub cookie_path: String,
    pub cookie_secure: bool,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub same_site: SameSite,
}

/// Result of a session operation.
///
/// Tokens are only present when the core issued new ones: a fast-path `get_session`
/// returns none, creation and refresh return all three.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct SessionTokens {
    pub handle: SessionHandle,
    pub user_id: UserId,
    pub user_data_in_jwt: JsonValue,
    pub access_token: Option<TokenInfo>,
    pub refresh_token: Option<TokenInfo>,
    pub id_refresh_token: Option<TokenInfo>,
    pub anti_csrf_token: Option<String>,
}

impl SessionTokens {
    /// Session identity without any newly issued token.
    #[must_use]
    pub fn without_tokens(handle: SessionHandle, user_id: UserId, user_data_in_jwt: JsonValue) -> Self {
        Self {
            handle,
            user_id,
            user_data_in_jwt,
            access_token: None,
            refresh_token: None,
            id_refresh_token: None,
            anti_csrf_token: None,
        }
    }
}

/// Identity of a calling SDK (frontend library or this driver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub version: String,
}

impl Device {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}
