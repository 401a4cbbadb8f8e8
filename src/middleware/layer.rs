use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::state::SessionState;

/// Session middleware for `axum::middleware::from_fn_with_state`.
///
/// `OPTIONS` and `TRACE` pass through untouched. A `POST` to the refresh API rotates
/// the refresh token; every other request must carry a valid session. On success the
/// [`Session`](super::Session) is inserted into request extensions and its cookie
/// changes are written to the handler's response. On failure the handler is not run.
///
/// ```rust,ignore
/// let state = SessionState::new(&SessionConfig::from_env()?)?;
/// let app = Router::new()
///     .route("/refresh", post(|| async { "" }))
///     .route("/profile", get(profile))
///     .route_layer(middleware::from_fn_with_state(state.clone(), verify_session));
/// ```
pub async fn verify_session(
    State(state): State<SessionState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method == Method::OPTIONS || method == Method::TRACE {
        return next.run(request).await;
    }

    let result = match state.is_refresh_request(&method, request.uri().path()).await {
        Ok(true) => state.refresh_session(request.headers()).await,
        Ok(false) => {
            let do_anti_csrf_check = state.anti_csrf_check_for(&method);
            state.get_session(request.headers(), do_anti_csrf_check).await
        }
        Err(rejection) => Err(rejection),
    };
    let session = match result {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    let updates = session.updates();
    request.extensions_mut().insert(session);
    let response = next.run(request).await;

    let pending = std::mem::take(&mut *updates.lock());
    (pending, response).into_response()
}
