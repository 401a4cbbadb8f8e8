use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::types::{SessionHandle, UserId};

/// The only accepted JWT header, base64-encoded once.
static HEADER_V2: LazyLock<String> =
    LazyLock::new(|| STANDARD.encode(r#"{"alg":"RS256","typ":"JWT","version":"2"}"#));

/// Why a JWT was rejected.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum JwtError {
    #[error("Invalid JWT")]
    Malformed,
    #[error("JWT header mismatch")]
    HeaderMismatch,
    #[error("JWT verification failed")]
    BadSignature,
    #[error("Invalid signing public key: {0}")]
    InvalidKey(String),
    #[error("Invalid JWT payload: {0}")]
    Payload(String),
}

/// RSA public key used to verify access tokens.
#[derive(Clone)]
pub struct PublicKey {
    inner: DecodingKey,
}

/// Parses the core's signing key: base64 of a DER `SubjectPublicKeyInfo`.
///
/// # Errors
///
/// Returns `JwtError::InvalidKey` if the key is not valid base64 or not an RSA key.
pub fn parse_public_key(public_key: &str) -> Result<PublicKey, JwtError> {
    let der = STANDARD
        .decode(public_key.trim())
        .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

    let body = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");

    let inner = DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
    Ok(PublicKey { inner })
}

/// Verifies an RS256 JWT against `public_key` and returns its decoded payload.
///
/// Expiry is not checked here; see [`get_info_from_access_token`].
///
/// # Errors
///
/// Returns a [`JwtError`] if the token does not have three segments, carries another
/// header, fails signature verification, or its payload is not JSON.
pub fn verify_jwt_and_get_payload(jwt: &str, public_key: &str) -> Result<JsonValue, JwtError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    let [header, payload, signature] = parts.as_slice() else {
        return Err(JwtError::Malformed);
    };

    if *header != HEADER_V2.as_str() {
        return Err(JwtError::HeaderMismatch);
    }

    let key = parse_public_key(public_key)?;
    // jsonwebtoken expects URL-safe signatures; tokens carry standard base64.
    let signature = STANDARD
        .decode(signature)
        .map_err(|_| JwtError::BadSignature)?;
    let message = format!("{header}.{payload}");
    let verified = jsonwebtoken::crypto::verify(
        &URL_SAFE_NO_PAD.encode(signature),
        message.as_bytes(),
        &key.inner,
        Algorithm::RS256,
    )
    .map_err(|_| JwtError::BadSignature)?;
    if !verified {
        return Err(JwtError::BadSignature);
    }

    let payload = STANDARD
        .decode(payload)
        .map_err(|e| JwtError::Payload(e.to_string()))?;
    serde_json::from_slice(&payload).map_err(|e| JwtError::Payload(e.to_string()))
}

/// Decoded access-token payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AccessTokenInfo {
    pub session_handle: SessionHandle,
    pub user_id: UserId,
    pub refresh_token_hash1: String,
    /// Set only while the refresh-rotation grace window is open.
    #[serde(default)]
    pub parent_refresh_token_hash1: Option<String>,
    pub user_data: JsonValue,
    #[serde(default)]
    pub anti_csrf_token: Option<String>,
    /// Epoch milliseconds.
    pub expiry_time: i64,
    /// Epoch milliseconds.
    pub time_created: i64,
}

/// Verifies an access token locally and decodes its payload.
///
/// Never contacts the core.
///
/// # Errors
///
/// Returns [`Error::TryRefreshToken`] if the JWT is invalid, a required claim is missing
/// (the anti-CSRF claim is required when `do_anti_csrf_check` is set), or the token has
/// expired.
pub fn get_info_from_access_token(
    token: &str,
    public_key: &str,
    do_anti_csrf_check: bool,
) -> Result<AccessTokenInfo, Error> {
    let payload = verify_jwt_and_get_payload(token, public_key)
        .map_err(|e| Error::TryRefreshToken(format!("Error while verifying JWT: {e}")))?;

    let info: AccessTokenInfo = serde_json::from_value(payload).map_err(|_| missing_claims())?;
    if info.user_data.is_null() || (do_anti_csrf_check && info.anti_csrf_token.is_none()) {
        return Err(missing_claims());
    }

    if info.expiry_time < now_millis() {
        return Err(Error::TryRefreshToken("Access token expired".into()));
    }
    Ok(info)
}

fn missing_claims() -> Error {
    Error::TryRefreshToken(
        "Access token does not contain all the information. Maybe the structure has changed?"
            .into(),
    )
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::EncodingKey;
    use serde_json::json;

    use super::*;

    const SIGNING_KEY_PEM: &str = include_str!("../tests/fixtures/signing_key.pem");
    const SIGNING_KEY_PUB: &str = include_str!("../tests/fixtures/signing_key.pub");
    const OTHER_KEY_PUB: &str = include_str!("../tests/fixtures/other_key.pub");

    fn sign(header: &str, payload: &JsonValue) -> String {
        let payload = STANDARD.encode(payload.to_string());
        let message = format!("{header}.{payload}");
        let key = EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).unwrap();
        let signature =
            jsonwebtoken::crypto::sign(message.as_bytes(), &key, Algorithm::RS256).unwrap();
        let signature = STANDARD.encode(URL_SAFE_NO_PAD.decode(signature).unwrap());
        format!("{message}.{signature}")
    }

    fn claims(expiry_offset_ms: i64) -> JsonValue {
        json!({
            "sessionHandle": "handle-1",
            "userId": "user-1",
            "refreshTokenHash1": "hash-1",
            "parentRefreshTokenHash1": null,
            "userData": {"role": "admin"},
            "antiCsrfToken": "csrf-1",
            "expiryTime": now_millis() + expiry_offset_ms,
            "timeCreated": now_millis()
        })
    }

    #[test]
    fn header_is_stable() {
        assert_eq!(
            HEADER_V2.as_str(),
            "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCIsInZlcnNpb24iOiIyIn0="
        );
    }

    #[test]
    fn valid_token_decodes() {
        let token = sign(&HEADER_V2, &claims(60_000));
        let info = get_info_from_access_token(&token, SIGNING_KEY_PUB, true).unwrap();
        assert_eq!(info.session_handle.as_str(), "handle-1");
        assert_eq!(info.user_id.as_str(), "user-1");
        assert_eq!(info.user_data, json!({"role": "admin"}));
        assert_eq!(info.anti_csrf_token.as_deref(), Some("csrf-1"));
        assert_eq!(info.parent_refresh_token_hash1, None);
    }

    #[test]
    fn expired_token_needs_refresh_even_if_signed() {
        let token = sign(&HEADER_V2, &claims(-1_000));
        assert!(verify_jwt_and_get_payload(&token, SIGNING_KEY_PUB).is_ok());
        let err = get_info_from_access_token(&token, SIGNING_KEY_PUB, false).unwrap_err();
        assert!(matches!(err, Error::TryRefreshToken(msg) if msg == "Access token expired"));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = sign(&HEADER_V2, &claims(60_000));
        assert!(matches!(
            verify_jwt_and_get_payload(&token, OTHER_KEY_PUB),
            Err(JwtError::BadSignature)
        ));
        assert!(matches!(
            get_info_from_access_token(&token, OTHER_KEY_PUB, false),
            Err(Error::TryRefreshToken(_))
        ));
    }

    #[test]
    fn other_header_is_rejected() {
        let header = STANDARD.encode(r#"{"alg":"RS256","typ":"JWT","version":"1"}"#);
        let token = sign(&header, &claims(60_000));
        assert!(matches!(
            verify_jwt_and_get_payload(&token, SIGNING_KEY_PUB),
            Err(JwtError::HeaderMismatch)
        ));
    }

    #[test]
    fn segment_count_must_be_three() {
        assert!(matches!(
            verify_jwt_and_get_payload("a.b", SIGNING_KEY_PUB),
            Err(JwtError::Malformed)
        ));
        assert!(matches!(
            verify_jwt_and_get_payload("a.b.c.d", SIGNING_KEY_PUB),
            Err(JwtError::Malformed)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign(&HEADER_V2, &claims(60_000));
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut forged = claims(60_000);
        forged["userId"] = json!("attacker");
        parts[1] = STANDARD.encode(forged.to_string());
        let forged = parts.join(".");
        assert!(matches!(
            verify_jwt_and_get_payload(&forged, SIGNING_KEY_PUB),
            Err(JwtError::BadSignature)
        ));
    }

    #[test]
    fn missing_claim_needs_refresh() {
        let mut payload = claims(60_000);
        payload.as_object_mut().unwrap().remove("refreshTokenHash1");
        let token = sign(&HEADER_V2, &payload);
        assert!(matches!(
            get_info_from_access_token(&token, SIGNING_KEY_PUB, false),
            Err(Error::TryRefreshToken(_))
        ));
    }

    #[test]
    fn anti_csrf_claim_required_only_when_checked() {
        let mut payload = claims(60_000);
        payload.as_object_mut().unwrap().remove("antiCsrfToken");
        let token = sign(&HEADER_V2, &payload);
        assert!(get_info_from_access_token(&token, SIGNING_KEY_PUB, false).is_ok());
        assert!(get_info_from_access_token(&token, SIGNING_KEY_PUB, true).is_err());
    }

    #[test]
    fn garbage_key_is_invalid() {
        assert!(matches!(
            parse_public_key("not base64!"),
            Err(JwtError::InvalidKey(_))
        ));
    }
}
