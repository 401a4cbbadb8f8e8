//! In-process fake of the session core, served by axum on a random local port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use session_sdk::verify_jwt_and_get_payload;

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const SIGNING_KEY_PUB: &str = include_str!("../fixtures/signing_key.pub");
pub const OTHER_KEY_PUB: &str = include_str!("../fixtures/other_key.pub");

const JWT_HEADER: &str = r#"{"alg":"RS256","typ":"JWT","version":"2"}"#;

pub fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap()
}

/// Address that refuses connections.
pub fn dead_host() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Sign `payload` the way the core does: standard base64 segments, RS256.
pub fn sign_access_token(payload: &JsonValue) -> String {
    let header = STANDARD.encode(JWT_HEADER);
    let payload = STANDARD.encode(payload.to_string());
    let message = format!("{header}.{payload}");
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).unwrap();
    let signature = jsonwebtoken::crypto::sign(message.as_bytes(), &key, Algorithm::RS256).unwrap();
    let signature = STANDARD.encode(URL_SAFE_NO_PAD.decode(signature).unwrap());
    format!("{message}.{signature}")
}

#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub enable_anti_csrf: bool,
    pub blacklisting: bool,
    /// Published key expiry, relative to now.
    pub key_validity_ms: i64,
    /// Access token lifetime; negative issues already expired tokens.
    pub access_token_validity_ms: i64,
    pub session_expired_status_code: u16,
    pub refresh_token_path: String,
    pub versions: Vec<String>,
    /// Key announced by `/handshake`; session responses always carry the signing key.
    pub handshake_key: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            enable_anti_csrf: true,
            blacklisting: false,
            key_validity_ms: 3_600_000,
            access_token_validity_ms: 3_600_000,
            session_expired_status_code: 401,
            refresh_token_path: "/refresh".into(),
            versions: vec!["1.0".into(), "2.0".into()],
            handshake_key: SIGNING_KEY_PUB.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: JsonValue,
}

#[derive(Debug, Clone)]
struct StoredSession {
    handle: String,
    user_id: String,
    jwt_payload: JsonValue,
    session_data: JsonValue,
    anti_csrf: Option<String>,
}

#[derive(Debug, Clone)]
struct RefreshEntry {
    handle: String,
    used: bool,
}

#[derive(Default)]
pub struct CoreState {
    pub settings: Mutex<CoreSettings>,
    sessions: Mutex<HashMap<String, StoredSession>>,
    refresh_tokens: Mutex<HashMap<String, RefreshEntry>>,
    requests: Mutex<Vec<RecordedRequest>>,
    counter: AtomicU64,
}

impl CoreState {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Issue an access token for `session` whose refresh token is `refresh`.
    fn access_token(&self, session: &StoredSession, refresh: &str, parent: Option<&str>) -> JsonValue {
        let validity = self.settings.lock().access_token_validity_ms;
        let now = now_ms();
        let expiry = now + validity;
        let payload = json!({
            "sessionHandle": session.handle,
            "userId": session.user_id,
            "refreshTokenHash1": format!("hash-{refresh}"),
            "parentRefreshTokenHash1": parent.map(|p| format!("hash-{p}")),
            "userData": session.jwt_payload,
            "antiCsrfToken": session.anti_csrf,
            "expiryTime": expiry,
            "timeCreated": now
        });
        token_info(&sign_access_token(&payload), expiry, "/")
    }

    fn session_json(session: &StoredSession) -> JsonValue {
        json!({
            "handle": session.handle,
            "userId": session.user_id,
            "userDataInJWT": session.jwt_payload
        })
    }

    fn key_fields(&self) -> (String, i64) {
        let validity = self.settings.lock().key_validity_ms;
        (SIGNING_KEY_PUB.trim().to_string(), now_ms() + validity)
    }

    /// Full token set for a new or rotated session.
    fn issue(&self, session: &StoredSession, parent: Option<&str>) -> JsonValue {
        let refresh = self.next_id("refresh");
        self.refresh_tokens.lock().insert(
            refresh.clone(),
            RefreshEntry {
                handle: session.handle.clone(),
                used: false,
            },
        );
        let (key, key_expiry) = self.key_fields();
        let far = now_ms() + 86_400_000;
        json!({
            "status": "OK",
            "session": Self::session_json(session),
            "accessToken": self.access_token(session, &refresh, parent),
            "refreshToken": token_info(&refresh, far, "/refresh"),
            "idRefreshToken": token_info(&self.next_id("id"), far, "/"),
            "antiCsrfToken": session.anti_csrf,
            "jwtSigningPublicKey": key,
            "jwtSigningPublicKeyExpiryTime": key_expiry
        })
    }
}

fn token_info(token: &str, expiry: i64, path: &str) -> JsonValue {
    json!({
        "token": token,
        "expiry": expiry,
        "createdTime": now_ms(),
        "cookiePath": path,
        "cookieSecure": false,
        "sameSite": "lax"
    })
}

fn status(status: &str, message: &str) -> Json<JsonValue> {
    Json(json!({ "status": status, "message": message }))
}

pub struct FakeCore {
    pub addr: SocketAddr,
    pub state: Arc<CoreState>,
}

impl FakeCore {
    pub async fn start() -> Self {
        Self::start_with(CoreSettings::default()).await
    }

    pub async fn start_with(settings: CoreSettings) -> Self {
        let state = Arc::new(CoreState {
            settings: Mutex::new(settings),
            ..CoreState::default()
        });

        let app = Router::new()
            .route("/apiversion", get(api_version))
            .route("/handshake", post(handshake))
            .route("/session", post(create))
            .route("/session/verify", post(verify))
            .route("/session/refresh", post(refresh))
            .route("/session/remove", post(remove))
            .route("/session/user", get(handles_for_user))
            .route("/session/data", get(get_session_data).put(put_session_data))
            .route("/jwt/data", get(get_jwt_data).put(put_jwt_data))
            .route("/session/regenerate", post(regenerate))
            .route("/hello", get(|| async { "Hello" }).post(|| async { "Hello" }))
            .route("/echo", delete(echo))
            .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
            .layer(middleware::from_fn_with_state(Arc::clone(&state), record))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }
}

async fn record(State(core): State<Arc<CoreState>>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    core.requests.lock().push(RecordedRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null),
    });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn echo(Json(body): Json<JsonValue>) -> Json<JsonValue> {
    Json(json!({ "status": "OK", "received": body }))
}

async fn api_version(State(core): State<Arc<CoreState>>) -> Json<JsonValue> {
    let versions = core.settings.lock().versions.clone();
    Json(json!({ "versions": versions }))
}

async fn handshake(State(core): State<Arc<CoreState>>) -> Json<JsonValue> {
    let (_, key_expiry) = core.key_fields();
    let settings = core.settings.lock().clone();
    Json(json!({
        "status": "OK",
        "jwtSigningPublicKey": settings.handshake_key,
        "jwtSigningPublicKeyExpiryTime": key_expiry,
        "cookieSecure": false,
        "accessTokenPath": "/",
        "refreshTokenPath": settings.refresh_token_path,
        "idRefreshTokenPath": "/",
        "enableAntiCsrf": settings.enable_anti_csrf,
        "accessTokenBlacklistingEnabled": settings.blacklisting,
        "cookieSameSite": "lax",
        "sessionExpiredStatusCode": settings.session_expired_status_code
    }))
}

async fn create(State(core): State<Arc<CoreState>>, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    let anti_csrf = core
        .settings
        .lock()
        .enable_anti_csrf
        .then(|| core.next_id("csrf"));
    let session = StoredSession {
        handle: core.next_id("handle"),
        user_id: body["userId"].as_str().unwrap_or_default().to_string(),
        jwt_payload: body["userDataInJWT"].clone(),
        session_data: body["userDataInDatabase"].clone(),
        anti_csrf,
    };
    core.sessions
        .lock()
        .insert(session.handle.clone(), session.clone());
    Json(core.issue(&session, None))
}

async fn verify(State(core): State<Arc<CoreState>>, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    let token = body["accessToken"].as_str().unwrap_or_default();
    let payload = match verify_jwt_and_get_payload(token, SIGNING_KEY_PUB) {
        Ok(payload) => payload,
        Err(e) => return status("TRY_REFRESH_TOKEN", &e.to_string()),
    };
    if payload["expiryTime"].as_i64().unwrap_or_default() < now_ms() {
        return status("TRY_REFRESH_TOKEN", "access token expired");
    }

    let handle = payload["sessionHandle"].as_str().unwrap_or_default();
    let Some(session) = core.sessions.lock().get(handle).cloned() else {
        return status("UNAUTHORISED", "session does not exist");
    };

    let enable_anti_csrf = core.settings.lock().enable_anti_csrf;
    if enable_anti_csrf
        && body["doAntiCsrfCheck"].as_bool().unwrap_or_default()
        && body["antiCsrfToken"].as_str() != session.anti_csrf.as_deref()
    {
        return status("TRY_REFRESH_TOKEN", "anti-csrf check failed");
    }

    let mut response = json!({ "status": "OK", "session": CoreState::session_json(&session) });
    if payload["parentRefreshTokenHash1"].is_string() {
        // First use after a refresh: reissue without the parent hash.
        let refresh = payload["refreshTokenHash1"]
            .as_str()
            .unwrap_or_default()
            .trim_start_matches("hash-")
            .to_string();
        response["accessToken"] = core.access_token(&session, &refresh, None);
    }
    Json(response)
}

async fn refresh(State(core): State<Arc<CoreState>>, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    let token = body["refreshToken"].as_str().unwrap_or_default();
    let entry = core.refresh_tokens.lock().get(token).cloned();
    let Some(entry) = entry else {
        return status("UNAUTHORISED", "refresh token not found");
    };
    let Some(session) = core.sessions.lock().get(&entry.handle).cloned() else {
        return status("UNAUTHORISED", "session does not exist");
    };

    if entry.used {
        return Json(json!({
            "status": "TOKEN_THEFT_DETECTED",
            "session": { "handle": session.handle, "userId": session.user_id }
        }));
    }
    if let Some(e) = core.refresh_tokens.lock().get_mut(token) {
        e.used = true;
    }
    Json(core.issue(&session, Some(token)))
}

async fn remove(State(core): State<Arc<CoreState>>, Json(body): Json<JsonValue>) -> Json<JsonValue> {
    let mut sessions = core.sessions.lock();
    let revoked: Vec<String> = if let Some(user_id) = body["userId"].as_str() {
        let handles: Vec<String> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.handle.clone())
            .collect();
        handles.into_iter().filter(|h| sessions.remove(h).is_some()).collect()
    } else {
        body["sessionHandles"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str)
            .filter(|h| sessions.remove(*h).is_some())
            .map(str::to_string)
            .collect()
    };
    Json(json!({ "status": "OK", "sessionHandlesRevoked": revoked }))
}

async fn handles_for_user(
    State(core): State<Arc<CoreState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<JsonValue> {
    let user_id = params.get("userId").cloned().unwrap_or_default();
    let handles: Vec<String> = core
        .sessions
        .lock()
        .values()
        .filter(|s| s.user_id == user_id)
        .map(|s| s.handle.clone())
        .collect();
    Json(json!({ "status": "OK", "sessionHandles": handles }))
}

async fn get_session_data(
    State(core): State<Arc<CoreState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<JsonValue> {
    let handle = params.get("sessionHandle").cloned().unwrap_or_default();
    match core.sessions.lock().get(&handle) {
        Some(s) => Json(json!({ "status": "OK", "userDataInDatabase": s.session_data })),
        None => status("UNAUTHORISED", "session does not exist"),
    }
}

async fn put_session_data(
    State(core): State<Arc<CoreState>>,
    Json(body): Json<JsonValue>,
) -> Json<JsonValue> {
    let handle = body["sessionHandle"].as_str().unwrap_or_default();
    match core.sessions.lock().get_mut(handle) {
        Some(s) => {
            s.session_data = body["userDataInDatabase"].clone();
            Json(json!({ "status": "OK" }))
        }
        None => status("UNAUTHORISED", "session does not exist"),
    }
}

async fn get_jwt_data(
    State(core): State<Arc<CoreState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<JsonValue> {
    let handle = params.get("sessionHandle").cloned().unwrap_or_default();
    match core.sessions.lock().get(&handle) {
        Some(s) => Json(json!({ "status": "OK", "userDataInJWT": s.jwt_payload })),
        None => status("UNAUTHORISED", "session does not exist"),
    }
}

async fn put_jwt_data(
    State(core): State<Arc<CoreState>>,
    Json(body): Json<JsonValue>,
) -> Json<JsonValue> {
    let handle = body["sessionHandle"].as_str().unwrap_or_default();
    match core.sessions.lock().get_mut(handle) {
        Some(s) => {
            s.jwt_payload = body["userDataInJWT"].clone();
            Json(json!({ "status": "OK" }))
        }
        None => status("UNAUTHORISED", "session does not exist"),
    }
}

async fn regenerate(
    State(core): State<Arc<CoreState>>,
    Json(body): Json<JsonValue>,
) -> Json<JsonValue> {
    let token = body["accessToken"].as_str().unwrap_or_default();
    let Ok(payload) = verify_jwt_and_get_payload(token, SIGNING_KEY_PUB) else {
        return status("UNAUTHORISED", "invalid access token");
    };
    let handle = payload["sessionHandle"].as_str().unwrap_or_default();
    let session = {
        let mut sessions = core.sessions.lock();
        let Some(s) = sessions.get_mut(handle) else {
            return status("UNAUTHORISED", "session does not exist");
        };
        s.jwt_payload = body["userDataInJWT"].clone();
        s.clone()
    };
    let refresh = payload["refreshTokenHash1"]
        .as_str()
        .unwrap_or_default()
        .trim_start_matches("hash-")
        .to_string();
    Json(json!({
        "status": "OK",
        "session": CoreState::session_json(&session),
        "accessToken": core.access_token(&session, &refresh, None)
    }))
}
