use crate::types::{SessionHandle, UserId};

/// Errors surfaced by every session operation.
///
/// The four kinds are fixed; callers match them exhaustively to decide whether to
/// refresh, clear cookies, revoke, or report an internal failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The access token is invalid, expired or could not be judged locally.
    /// The caller should attempt a refresh before treating the session as gone.
    #[error("Try refresh token: {0}")]
    TryRefreshToken(String),

    /// The core positively rejected the session or refresh token.
    /// The caller must clear the session cookies.
    #[error("Unauthorised: {0}")]
    Unauthorised(String),

    /// A rotated refresh token was reused.
    #[error("Token theft detected for session {session_handle} (user {user_id})")]
    TokenTheftDetected {
        session_handle: SessionHandle,
        user_id: UserId,
    },

    /// Connectivity, compatibility or response-shape failure.
    #[error(transparent)]
    General(#[from] GeneralError),
}

impl Error {
    /// Whether the session cookies should be cleared by the adapter.
    #[must_use]
    pub fn clears_session(&self) -> bool {
        matches!(self, Self::Unauthorised(_) | Self::TokenTheftDetected { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::General(GeneralError::Http(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::General(GeneralError::Json(e))
    }
}

/// Failures that are not about session state.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GeneralError {
    #[error("No core instance available to query")]
    NoCoreAvailable,

    #[error(
        "The running core is not compatible with this SDK (core supports {server_versions:?}, \
         SDK supports {sdk_versions:?})"
    )]
    IncompatibleCore {
        server_versions: Vec<String>,
        sdk_versions: Vec<String>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Core responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response from {path}: {detail}")]
    UnexpectedResponse { path: String, detail: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GeneralError {
    pub(crate) fn unexpected(path: &str, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}
