//! Session cookies and verification for Axum.
//!
//! Moves session tokens between HTTP cookies/headers and the [`SessionClient`]:
//! the access, refresh and id-refresh tokens live in http-only cookies, the anti-CSRF
//! token and id-refresh marker travel in headers readable by the frontend.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use axum::{Router, middleware, routing::{get, post}};
//! use session_sdk::SessionConfig;
//! use session_sdk::middleware::{Session, SessionState, verify_session};
//!
//! let state = SessionState::new(&SessionConfig::from_env()?)?;
//!
//! // Issue a session from your login handler
//! async fn login(State(state): State<SessionState>) -> Result<(Session, &'static str), SessionRejection> {
//!     let session = state
//!         .create_new_session(&"user-1".to_string().into(), json!({}), json!({}))
//!         .await?;
//!     Ok((session, "logged in"))
//! }
//!
//! // Protect routes; `POST /refresh` (the handshake's refresh path) rotates tokens
//! let protected = Router::new()
//!     .route("/profile", get(|session: Session| async move { session.user_id().to_string() }))
//!     .route("/refresh", post(|| async { "" }))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), verify_session));
//! ```
//!
//! [`SessionClient`]: crate::session::SessionClient

mod cookies;
mod error;
mod layer;
mod session;
mod state;

pub use cookies::{
    ACCESS_TOKEN_COOKIE, ANTI_CSRF_HEADER, ID_REFRESH_TOKEN_COOKIE, ID_REFRESH_TOKEN_HEADER,
    REFRESH_TOKEN_COOKIE, SDK_NAME_HEADER, SDK_VERSION_HEADER, options_headers,
};
pub use error::SessionRejection;
pub use layer::verify_session;
pub use session::Session;
pub use state::SessionState;
