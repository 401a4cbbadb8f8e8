use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value as JsonValue;

use super::cookies::{
    ACCESS_TOKEN_COOKIE, ANTI_CSRF_HEADER, CookieLayout, CookieOverrides, ID_REFRESH_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE, SDK_NAME_HEADER, SDK_VERSION_HEADER, SessionUpdates, cookie_value,
    header_value,
};
use super::error::SessionRejection;
use super::session::Session;
use crate::config::SessionConfig;
use crate::error::{Error, GeneralError};
use crate::session::SessionClient;
use crate::types::{Device, SessionTokens, UserId};

/// Shared state for [`verify_session`](super::verify_session) and session-issuing handlers.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
    anti_csrf_check: Option<bool>,
}

struct Inner {
    client: SessionClient,
    overrides: CookieOverrides,
    refresh_api_path: Option<String>,
}

impl SessionState {
    /// Build the session client and adapter settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError`] if the session client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, GeneralError> {
        Ok(Self::with_client(SessionClient::new(config)?, config))
    }

    /// Wrap an existing client; cookie and path settings still come from `config`.
    #[must_use]
    pub fn with_client(client: SessionClient, config: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                overrides: CookieOverrides::from_config(config),
                refresh_api_path: config.refresh_api_path().map(str::to_string),
            }),
            anti_csrf_check: None,
        }
    }

    /// Force the anti-CSRF check on or off for routes using this state.
    ///
    /// By default it is enforced on every method except `GET`.
    #[must_use]
    pub fn with_anti_csrf_check(mut self, enabled: bool) -> Self {
        self.anti_csrf_check = Some(enabled);
        self
    }

    #[must_use]
    pub fn client(&self) -> &SessionClient {
        &self.inner.client
    }

    /// Issue a new session and queue its cookies and headers on the returned [`Session`].
    ///
    /// Return the session from the handler (it implements `IntoResponseParts`) to
    /// deliver the cookies.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`] if the core cannot create the session.
    pub async fn create_new_session(
        &self,
        user_id: &UserId,
        jwt_payload: JsonValue,
        session_data: JsonValue,
    ) -> Result<Session, SessionRejection> {
        let result = self
            .inner
            .client
            .create_new_session(user_id, jwt_payload, session_data)
            .await
            .and_then(|tokens| self.issue(tokens, "/session"));
        match result {
            Ok(session) => Ok(session),
            Err(e) => Err(self.reject(e).await),
        }
    }

    /// Resolve the session of a request from its cookies and headers.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`] mapping the session error to a response; an
    /// `Unauthorised` rejection also clears the session cookies.
    pub async fn get_session(
        &self,
        headers: &HeaderMap,
        do_anti_csrf_check: bool,
    ) -> Result<Session, SessionRejection> {
        self.record_frontend_sdk(headers);
        let jar = CookieJar::from_headers(headers);

        let Some(access_token) = cookie_value(&jar, ACCESS_TOKEN_COOKIE) else {
            let error = Error::TryRefreshToken("access token missing in cookies".into());
            return Err(self.reject(error).await);
        };
        let anti_csrf_token = header_value(headers, ANTI_CSRF_HEADER);
        let id_refresh_token = cookie_value(&jar, ID_REFRESH_TOKEN_COOKIE);

        let tokens = match self
            .inner
            .client
            .get_session(
                &access_token,
                anti_csrf_token.as_deref(),
                do_anti_csrf_check,
                id_refresh_token.as_deref(),
            )
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => return Err(self.reject(e).await),
        };

        let mut updates = SessionUpdates::default();
        let access_token = match &tokens.access_token {
            Some(reissued) => {
                updates.attach_access_token(reissued, &self.inner.overrides);
                reissued.token.clone()
            }
            None => access_token,
        };
        Ok(Session::new(self.clone(), access_token, tokens, updates))
    }

    /// Rotate the refresh token of a request and queue the new cookies.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`]; `Unauthorised` and token theft clear the session
    /// cookies, and theft also revokes the session on the core.
    pub async fn refresh_session(&self, headers: &HeaderMap) -> Result<Session, SessionRejection> {
        self.record_frontend_sdk(headers);
        let jar = CookieJar::from_headers(headers);

        let Some(refresh_token) = cookie_value(&jar, REFRESH_TOKEN_COOKIE) else {
            let error = Error::Unauthorised(
                "Missing auth tokens in cookies. Have you set the correct refresh API path in \
                 your frontend and session config?"
                    .into(),
            );
            return Err(self.reject(error).await);
        };
        let anti_csrf_token = header_value(headers, ANTI_CSRF_HEADER);

        let result = self
            .inner
            .client
            .refresh_session(&refresh_token, anti_csrf_token.as_deref())
            .await
            .and_then(|tokens| self.issue(tokens, "/session/refresh"));
        match result {
            Ok(session) => Ok(session),
            Err(e) => Err(self.reject(e).await),
        }
    }

    /// Whether `method` and `path` address the refresh API.
    ///
    /// A trailing slash on either side is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionRejection`] if the handshake is needed and cannot be fetched.
    pub async fn is_refresh_request(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<bool, SessionRejection> {
        if method != Method::POST {
            return Ok(false);
        }
        let refresh_path = match &self.inner.refresh_api_path {
            Some(path) => path.clone(),
            None => match self.inner.client.handshake_info().await {
                Ok(info) => info.refresh_token_path.clone(),
                Err(e) => return Err(SessionRejection::internal(e)),
            },
        };
        Ok(path.trim_end_matches('/') == refresh_path.trim_end_matches('/'))
    }

    /// Anti-CSRF enforcement for a request with `method`.
    pub(super) fn anti_csrf_check_for(&self, method: &Method) -> bool {
        self.anti_csrf_check.unwrap_or(method != Method::GET)
    }

    pub(super) fn overrides(&self) -> &CookieOverrides {
        &self.inner.overrides
    }

    pub(super) async fn cookie_layout(&self) -> Result<CookieLayout, Error> {
        let info = self.inner.client.handshake_info().await?;
        Ok(self.inner.overrides.layout(&info))
    }

    /// Map a session error to its response, clearing cookies and revoking on theft.
    pub(super) async fn reject(&self, error: Error) -> SessionRejection {
        let Some(body) = rejection_body(&error) else {
            return SessionRejection::internal(error);
        };
        let info = match self.inner.client.handshake_info().await {
            Ok(info) => info,
            Err(e) => return SessionRejection::internal(e),
        };
        let status = StatusCode::from_u16(info.session_expired_status_code)
            .unwrap_or(StatusCode::UNAUTHORIZED);

        if let Error::TokenTheftDetected {
            session_handle,
            user_id,
        } = &error
        {
            tracing::warn!(
                session_handle = %session_handle,
                user_id = %user_id,
                "Refresh token theft detected, revoking session"
            );
            if let Err(e) = self.inner.client.revoke_session(session_handle).await {
                tracing::warn!(error = %e, "Failed to revoke session after theft detection");
            }
        }

        let mut updates = SessionUpdates::default();
        if error.clears_session() {
            updates.clear_session(&self.inner.overrides.layout(&info));
        }
        SessionRejection::new(error, status, body).with_updates(updates)
    }

    fn record_frontend_sdk(&self, headers: &HeaderMap) {
        if let (Some(name), Some(version)) = (
            header_value(headers, SDK_NAME_HEADER),
            header_value(headers, SDK_VERSION_HEADER),
        ) {
            self.inner.client.frontend_sdks().add(Device::new(name, version));
        }
    }

    /// Queue cookies for a freshly issued token set.
    fn issue(&self, tokens: SessionTokens, path: &str) -> Result<Session, Error> {
        let overrides = &self.inner.overrides;
        let mut updates = SessionUpdates::default();

        let (Some(access), Some(refresh), Some(id_refresh)) =
            (&tokens.access_token, &tokens.refresh_token, &tokens.id_refresh_token)
        else {
            return Err(GeneralError::unexpected(path, "missing issued tokens").into());
        };
        updates.attach_access_token(access, overrides);
        updates.attach_refresh_token(refresh, overrides);
        updates.set_id_refresh_token(id_refresh, overrides);
        if let Some(anti_csrf) = &tokens.anti_csrf_token {
            updates.set_anti_csrf_token(anti_csrf);
        }

        let access_token = access.token.clone();
        Ok(Session::new(self.clone(), access_token, tokens, updates))
    }
}

/// Response body for session-state errors; `None` for internal failures.
fn rejection_body(error: &Error) -> Option<&'static str> {
    match error {
        Error::TryRefreshToken(_) => Some("try refresh token"),
        Error::Unauthorised(_) => Some("unauthorised"),
        Error::TokenTheftDetected { .. } => Some("token theft detected"),
        Error::General(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionHandle, UserId};

    #[test]
    fn bodies_follow_error_kind() {
        assert_eq!(
            rejection_body(&Error::TryRefreshToken("x".into())),
            Some("try refresh token")
        );
        assert_eq!(rejection_body(&Error::Unauthorised("x".into())), Some("unauthorised"));
        assert_eq!(
            rejection_body(&Error::TokenTheftDetected {
                session_handle: SessionHandle::from("h".to_string()),
                user_id: UserId::from("u".to_string()),
            }),
            Some("token theft detected")
        );
        assert_eq!(rejection_body(&GeneralError::NoCoreAvailable.into()), None);
    }

    #[test]
    fn anti_csrf_defaults_to_non_get() {
        let config = SessionConfig::default();
        let state = SessionState::new(&config).unwrap();
        assert!(!state.anti_csrf_check_for(&Method::GET));
        assert!(state.anti_csrf_check_for(&Method::POST));

        let forced = state.with_anti_csrf_check(true);
        assert!(forced.anti_csrf_check_for(&Method::GET));
    }

    #[tokio::test]
    async fn configured_refresh_path_matches_without_handshake() {
        let config = SessionConfig::default().with_refresh_api_path("/auth/refresh");
        let state = SessionState::new(&config).unwrap();
        assert!(state.is_refresh_request(&Method::POST, "/auth/refresh").await.unwrap());
        assert!(state.is_refresh_request(&Method::POST, "/auth/refresh/").await.unwrap());
        assert!(!state.is_refresh_request(&Method::GET, "/auth/refresh").await.unwrap());
        assert!(!state.is_refresh_request(&Method::POST, "/auth").await.unwrap());
    }
}
