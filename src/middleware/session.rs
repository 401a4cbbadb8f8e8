use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponseParts, ResponseParts};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::cookies::SessionUpdates;
use super::error::SessionRejection;
use super::state::SessionState;
use crate::error::{Error, GeneralError};
use crate::types::{SessionHandle, SessionTokens, UserId};

/// The verified session of the current request.
///
/// Inserted into request extensions by [`verify_session`](super::verify_session) and
/// usable as an extractor. Cookie changes made through it are written to the response.
///
/// ```rust,ignore
/// async fn profile(session: Session) -> Result<String, SessionRejection> {
///     let data = session.get_session_data().await?;
///     Ok(format!("{}: {data}", session.user_id()))
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    state: SessionState,
    access_token: String,
    handle: SessionHandle,
    user_id: UserId,
    jwt_payload: JsonValue,
    updates: Arc<Mutex<SessionUpdates>>,
}

impl Session {
    pub(super) fn new(
        state: SessionState,
        access_token: String,
        tokens: SessionTokens,
        updates: SessionUpdates,
    ) -> Self {
        Self {
            state,
            access_token,
            handle: tokens.handle,
            user_id: tokens.user_id,
            jwt_payload: tokens.user_data_in_jwt,
            updates: Arc::new(Mutex::new(updates)),
        }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn jwt_payload(&self) -> &JsonValue {
        &self.jwt_payload
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Revoke this session on the core and clear its cookies.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`] if the core cannot be reached.
    pub async fn revoke_session(&self) -> Result<(), SessionRejection> {
        let result = async {
            if self.state.client().revoke_session(&self.handle).await? {
                let layout = self.state.cookie_layout().await?;
                self.updates.lock().clear_session(&layout);
            }
            Ok::<_, Error>(())
        }
        .await;
        self.or_reject(result).await
    }

    /// # Errors
    ///
    /// Returns a [`SessionRejection`]; if the session no longer exists its cookies are
    /// cleared.
    pub async fn get_session_data(&self) -> Result<JsonValue, SessionRejection> {
        let result = self.state.client().get_session_data(&self.handle).await;
        self.or_reject(result).await
    }

    /// # Errors
    ///
    /// Returns a [`SessionRejection`]; if the session no longer exists its cookies are
    /// cleared.
    pub async fn update_session_data(&self, data: JsonValue) -> Result<(), SessionRejection> {
        let result = self
            .state
            .client()
            .update_session_data(&self.handle, data)
            .await;
        self.or_reject(result).await
    }

    /// Replace the JWT payload and reissue this request's access token with it.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`]; if the session no longer exists its cookies are
    /// cleared.
    pub async fn update_jwt_payload(&mut self, payload: JsonValue) -> Result<(), SessionRejection> {
        let result = self
            .state
            .client()
            .regenerate_session(&self.access_token, payload)
            .await;
        let tokens = self.or_reject(result).await?;

        self.jwt_payload = tokens.user_data_in_jwt;
        if let Some(access) = tokens.access_token {
            self.updates
                .lock()
                .attach_access_token(&access, self.state.overrides());
            self.access_token = access.token;
        }
        Ok(())
    }

    /// Shared handle to the response changes queued by this session.
    pub(super) fn updates(&self) -> Arc<Mutex<SessionUpdates>> {
        Arc::clone(&self.updates)
    }

    async fn or_reject<T>(&self, result: Result<T, Error>) -> Result<T, SessionRejection> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.state.reject(e).await),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Writes the queued cookies and headers. Queued changes are written once.
impl IntoResponseParts for Session {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let updates = std::mem::take(&mut *self.updates.lock());
        updates.into_response_parts(res)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or_else(|| {
            SessionRejection::internal(
                GeneralError::Config("verify_session middleware is not installed".into()).into(),
            )
        })
    }
}
