//! Session lifecycle against the core: create, verify, refresh, revoke, and payload
//! updates.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::config::SessionConfig;
use crate::device_info::FrontendSdkRegistry;
use crate::error::{Error, GeneralError};
use crate::handshake::{HandshakeCache, HandshakeInfo, SigningKey};
use crate::process_state::{ProcessEvent, ProcessState};
use crate::querier::Querier;
use crate::token::get_info_from_access_token;
use crate::types::{SessionHandle, SessionTokens, TokenInfo, UserId};

/// `status` field of a core response. Absent means `OK`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
enum CoreStatus {
    #[default]
    Ok,
    Unauthorised,
    Other(String),
}

impl From<String> for CoreStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OK" => Self::Ok,
            "UNAUTHORISED" => Self::Unauthorised,
            _ => Self::Other(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    handle: SessionHandle,
    user_id: UserId,
    #[serde(default)]
    user_data_in_jwt: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    status: CoreStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session: Option<SessionInfo>,
    #[serde(default)]
    access_token: Option<TokenInfo>,
    #[serde(default)]
    refresh_token: Option<TokenInfo>,
    #[serde(default)]
    id_refresh_token: Option<TokenInfo>,
    #[serde(default)]
    anti_csrf_token: Option<String>,
    #[serde(default)]
    jwt_signing_public_key: Option<String>,
    #[serde(default)]
    jwt_signing_public_key_expiry_time: Option<i64>,
}

impl SessionResponse {
    fn message(&self) -> String {
        self.message.clone().unwrap_or_default()
    }

    fn signing_key(&self) -> Option<SigningKey> {
        match (&self.jwt_signing_public_key, self.jwt_signing_public_key_expiry_time) {
            (Some(key), Some(expiry)) => Some(SigningKey::new(key.clone(), expiry)),
            _ => None,
        }
    }

    fn into_tokens(self, path: &str) -> Result<SessionTokens, Error> {
        let session = self
            .session
            .ok_or_else(|| GeneralError::unexpected(path, "missing session"))?;
        let mut tokens =
            SessionTokens::without_tokens(session.handle, session.user_id, session.user_data_in_jwt);
        tokens.access_token = self.access_token;
        tokens.refresh_token = self.refresh_token;
        tokens.id_refresh_token = self.id_refresh_token;
        tokens.anti_csrf_token = self.anti_csrf_token;
        Ok(tokens)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevokedResponse {
    session_handles_revoked: Vec<SessionHandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandlesResponse {
    session_handles: Vec<SessionHandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataResponse {
    #[serde(default)]
    status: CoreStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_data_in_database: Option<JsonValue>,
    #[serde(default)]
    user_data_in_jwt: Option<JsonValue>,
}

impl DataResponse {
    /// Fail with `Unauthorised` unless the core answered `OK`.
    fn ok(self) -> Result<Self, Error> {
        match self.status {
            CoreStatus::Ok => Ok(self),
            _ => Err(Error::Unauthorised(self.message.unwrap_or_default())),
        }
    }
}

/// Session operations against the core.
///
/// Owns the querier, the handshake cache, the frontend SDK registry and the process-state
/// log. Build one per process and share it behind an `Arc`.
pub struct SessionClient {
    querier: Arc<Querier>,
    handshake: HandshakeCache,
    frontend_sdks: Arc<FrontendSdkRegistry>,
    process_state: ProcessState,
}

impl SessionClient {
    /// Build every collaborator from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeneralError::Config`] if no host is configured, or
    /// [`GeneralError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, GeneralError> {
        let frontend_sdks = Arc::new(FrontendSdkRegistry::new());
        let querier = Querier::new(config, Arc::clone(&frontend_sdks))?;
        Ok(Self::with_querier(querier, frontend_sdks, config.is_testing()))
    }

    /// Build around an existing querier (custom transport).
    #[must_use]
    pub fn with_querier(
        querier: Querier,
        frontend_sdks: Arc<FrontendSdkRegistry>,
        testing: bool,
    ) -> Self {
        let querier = Arc::new(querier);
        Self {
            handshake: HandshakeCache::new(Arc::clone(&querier)),
            querier,
            frontend_sdks,
            process_state: ProcessState::new(testing),
        }
    }

    #[must_use]
    pub fn querier(&self) -> &Querier {
        &self.querier
    }

    #[must_use]
    pub fn frontend_sdks(&self) -> &FrontendSdkRegistry {
        &self.frontend_sdks
    }

    #[must_use]
    pub fn process_state(&self) -> &ProcessState {
        &self.process_state
    }

    /// The core's session configuration, fetched on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the handshake cannot be fetched.
    pub async fn handshake_info(&self) -> Result<Arc<HandshakeInfo>, Error> {
        self.handshake.get().await
    }

    /// Create a session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached or answers unexpectedly.
    pub async fn create_new_session(
        &self,
        user_id: &UserId,
        jwt_payload: JsonValue,
        session_data: JsonValue,
    ) -> Result<SessionTokens, Error> {
        self.handshake.get().await?;

        let body = json!({
            "userId": user_id,
            "userDataInJWT": jwt_payload,
            "userDataInDatabase": session_data,
        });
        let response: SessionResponse = self.querier.post("/session", body).await?;
        self.apply_key_rotation(&response).await;
        response.into_tokens("/session")
    }

    /// Verify an access token, locally when possible.
    ///
    /// When blacklisting is disabled and the token is outside the post-refresh grace
    /// window, a locally valid token is accepted without asking the core. A session
    /// revoked on the core therefore stays usable here until its access token expires.
    /// This trades immediate revocation for one fewer round trip per request.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorised`] if no id-refresh token is present or the core rejects
    ///   the session.
    /// - [`Error::TryRefreshToken`] if anti-CSRF is enforced and the token is missing or
    ///   wrong, or the core judges the access token invalid or expired.
    /// - [`Error::General`] on connectivity or response-shape failures.
    pub async fn get_session(
        &self,
        access_token: &str,
        anti_csrf_token: Option<&str>,
        do_anti_csrf_check: bool,
        id_refresh_token: Option<&str>,
    ) -> Result<SessionTokens, Error> {
        if id_refresh_token.is_none() {
            return Err(Error::Unauthorised("id refresh token is missing".into()));
        }

        let handshake = self.handshake.get().await?;
        let check_anti_csrf = handshake.enable_anti_csrf && do_anti_csrf_check;

        if handshake.signing_key.is_usable() {
            match get_info_from_access_token(
                access_token,
                &handshake.signing_key.public_key,
                check_anti_csrf,
            ) {
                Ok(info) => {
                    if check_anti_csrf && anti_csrf_token != info.anti_csrf_token.as_deref() {
                        return Err(Error::TryRefreshToken("anti-csrf check failed".into()));
                    }
                    if !handshake.access_token_blacklisting_enabled
                        && info.parent_refresh_token_hash1.is_none()
                    {
                        return Ok(SessionTokens::without_tokens(
                            info.session_handle,
                            info.user_id,
                            info.user_data,
                        ));
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Local access token verification inconclusive");
                }
            }
        }

        self.process_state
            .add_state(ProcessEvent::CallingServiceInVerify);
        tracing::debug!("Verifying session with the core");

        let mut body = json!({
            "accessToken": access_token,
            "doAntiCsrfCheck": do_anti_csrf_check,
        });
        if let Some(token) = anti_csrf_token {
            body["antiCsrfToken"] = json!(token);
        }

        let response: SessionResponse = self.querier.post("/session/verify", body).await?;
        match response.status {
            CoreStatus::Ok => {
                self.apply_key_rotation(&response).await;
                response.into_tokens("/session/verify")
            }
            CoreStatus::Unauthorised => Err(Error::Unauthorised(response.message())),
            CoreStatus::Other(_) => Err(Error::TryRefreshToken(response.message())),
        }
    }

    /// Exchange a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorised`] if the refresh token is unknown or expired.
    /// - [`Error::TokenTheftDetected`] if an already rotated refresh token was reused.
    /// - [`Error::General`] on connectivity or response-shape failures.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
    ) -> Result<SessionTokens, Error> {
        let mut body = json!({ "refreshToken": refresh_token });
        if let Some(token) = anti_csrf_token {
            body["antiCsrfToken"] = json!(token);
        }

        let response: SessionResponse = self.querier.post("/session/refresh", body).await?;
        match response.status {
            CoreStatus::Ok => {
                self.apply_key_rotation(&response).await;
                response.into_tokens("/session/refresh")
            }
            CoreStatus::Unauthorised => Err(Error::Unauthorised(response.message())),
            CoreStatus::Other(status) => {
                let session = response.session.ok_or_else(|| {
                    GeneralError::unexpected(
                        "/session/refresh",
                        format!("status {status} without session"),
                    )
                })?;
                Err(Error::TokenTheftDetected {
                    session_handle: session.handle,
                    user_id: session.user_id,
                })
            }
        }
    }

    /// Revoke every session of `user_id`, returning the revoked handles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached.
    pub async fn revoke_all_sessions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        let response: RevokedResponse = self
            .querier
            .post("/session/remove", json!({ "userId": user_id }))
            .await?;
        Ok(response.session_handles_revoked)
    }

    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached.
    pub async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        let response: HandlesResponse = self
            .querier
            .get("/session/user", &[("userId", user_id.as_str())])
            .await?;
        Ok(response.session_handles)
    }

    /// Revoke one session. Returns `false` if it was already gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached.
    pub async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, Error> {
        let revoked = self
            .revoke_multiple_sessions(std::slice::from_ref(handle))
            .await?;
        Ok(revoked.len() == 1)
    }

    /// Revoke `handles`, returning the ones that existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::General`] if the core cannot be reached.
    pub async fn revoke_multiple_sessions(
        &self,
        handles: &[SessionHandle],
    ) -> Result<Vec<SessionHandle>, Error> {
        let response: RevokedResponse = self
            .querier
            .post("/session/remove", json!({ "sessionHandles": handles }))
            .await?;
        Ok(response.session_handles_revoked)
    }

    /// Data stored on the core for `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorised`] if the session does not exist.
    pub async fn get_session_data(&self, handle: &SessionHandle) -> Result<JsonValue, Error> {
        let response: DataResponse = self
            .querier
            .get("/session/data", &[("sessionHandle", handle.as_str())])
            .await?;
        Ok(response
            .ok()?
            .user_data_in_database
            .unwrap_or(JsonValue::Null))
    }

    /// # Errors
    ///
    /// Returns [`Error::Unauthorised`] if the session does not exist.
    pub async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: JsonValue,
    ) -> Result<(), Error> {
        let response: DataResponse = self
            .querier
            .put(
                "/session/data",
                json!({ "sessionHandle": handle, "userDataInDatabase": data }),
            )
            .await?;
        response.ok().map(|_| ())
    }

    /// Payload the core embeds in access tokens issued for `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorised`] if the session does not exist.
    pub async fn get_jwt_payload(&self, handle: &SessionHandle) -> Result<JsonValue, Error> {
        let response: DataResponse = self
            .querier
            .get("/jwt/data", &[("sessionHandle", handle.as_str())])
            .await?;
        Ok(response.ok()?.user_data_in_jwt.unwrap_or(JsonValue::Null))
    }

    /// Replace the payload for future access tokens. Already issued tokens keep the old one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorised`] if the session does not exist.
    pub async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: JsonValue,
    ) -> Result<(), Error> {
        let response: DataResponse = self
            .querier
            .put(
                "/jwt/data",
                json!({ "sessionHandle": handle, "userDataInJWT": payload }),
            )
            .await?;
        response.ok().map(|_| ())
    }

    /// Reissue `access_token` with `payload`, keeping the refresh chain.
    ///
    /// Only the access token is returned; nothing else rotates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorised`] if the session does not exist.
    pub async fn regenerate_session(
        &self,
        access_token: &str,
        payload: JsonValue,
    ) -> Result<SessionTokens, Error> {
        let body = json!({ "accessToken": access_token, "userDataInJWT": payload });
        let response: SessionResponse = self.querier.post("/session/regenerate", body).await?;
        if response.status == CoreStatus::Unauthorised {
            return Err(Error::Unauthorised(response.message()));
        }

        let mut tokens = response.into_tokens("/session/regenerate")?;
        tokens.refresh_token = None;
        tokens.id_refresh_token = None;
        tokens.anti_csrf_token = None;
        Ok(tokens)
    }

    /// Forget every cached value so the next call starts fresh. Intended for test harnesses.
    pub fn reset(&self) {
        self.handshake.reset();
        self.querier.reset();
        self.frontend_sdks.reset();
        self.process_state.reset();
    }

    async fn apply_key_rotation(&self, response: &SessionResponse) {
        if let Some(key) = response.signing_key() {
            self.handshake.update_signing_key(key).await;
        }
    }
}
