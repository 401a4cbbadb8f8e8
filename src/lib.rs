#![doc = include_str!("../README.md")]

pub mod config;
pub mod device_info;
pub mod error;
pub mod handshake;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod process_state;
pub mod querier;
pub mod session;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use config::SessionConfig;
pub use error::{Error, GeneralError};
pub use handshake::{HandshakeCache, HandshakeInfo, SigningKey};
pub use process_state::{ProcessEvent, ProcessState};
pub use querier::Querier;
pub use session::SessionClient;
pub use token::{AccessTokenInfo, JwtError, get_info_from_access_token, verify_jwt_and_get_payload};
pub use types::{Device, SameSite, SessionHandle, SessionTokens, TokenInfo, UserId};
