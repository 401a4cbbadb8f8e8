use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::cookies::SessionUpdates;
use crate::error::Error;

/// A failed session operation, ready to be returned as the HTTP response.
///
/// Carries the status and body the session error maps to, plus any cookie clearing the
/// error requires.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SessionRejection {
    error: Error,
    status: StatusCode,
    body: String,
    updates: SessionUpdates,
}

impl SessionRejection {
    pub(super) fn new(error: Error, status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            error,
            status,
            body: body.into(),
            updates: SessionUpdates::default(),
        }
    }

    /// 500 with the error's message.
    pub(super) fn internal(error: Error) -> Self {
        tracing::error!(error = %error, "Session operation failed");
        let body = error.to_string();
        Self::new(error, StatusCode::INTERNAL_SERVER_ERROR, body)
    }

    pub(super) fn with_updates(mut self, updates: SessionUpdates) -> Self {
        self.updates = updates;
        self
    }

    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    #[must_use]
    pub fn into_error(self) -> Error {
        self.error
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        (self.status, self.updates, self.body).into_response()
    }
}
