use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_EXPOSE_HEADERS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite as CookieSameSite};
use time::Duration;

use crate::config::SessionConfig;
use crate::handshake::HandshakeInfo;
use crate::token::now_millis;
use crate::types::{SameSite, TokenInfo};

pub const ACCESS_TOKEN_COOKIE: &str = "sAccessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "sRefreshToken";
pub const ID_REFRESH_TOKEN_COOKIE: &str = "sIdRefreshToken";

pub const ID_REFRESH_TOKEN_HEADER: &str = "id-refresh-token";
pub const ANTI_CSRF_HEADER: &str = "anti-csrf";
pub const SDK_NAME_HEADER: &str = "supertokens-sdk-name";
pub const SDK_VERSION_HEADER: &str = "supertokens-sdk-version";

/// Cookie attributes configured locally that win over what the core returns.
#[derive(Debug, Clone, Default)]
pub(super) struct CookieOverrides {
    domain: Option<String>,
    secure: Option<bool>,
    same_site: Option<SameSite>,
    access_token_path: Option<String>,
}

impl CookieOverrides {
    pub(super) fn from_config(config: &SessionConfig) -> Self {
        Self {
            domain: config.cookie_domain().map(str::to_string),
            secure: config.cookie_secure(),
            same_site: config.cookie_same_site(),
            access_token_path: config.access_token_path().map(str::to_string),
        }
    }

    /// Where and how session cookies live, for clearing them.
    pub(super) fn layout(&self, info: &HandshakeInfo) -> CookieLayout {
        CookieLayout {
            domain: self.domain.clone().or_else(|| info.cookie_domain.clone()),
            secure: self.secure.unwrap_or(info.cookie_secure),
            same_site: self.same_site.unwrap_or(info.cookie_same_site),
            access_token_path: self
                .access_token_path
                .clone()
                .unwrap_or_else(|| info.access_token_path.clone()),
            refresh_token_path: info.refresh_token_path.clone(),
            id_refresh_token_path: info.id_refresh_token_path.clone(),
        }
    }

    fn token_cookie(&self, name: &'static str, token: &TokenInfo, path: String) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, token.token.clone()))
            .http_only(true)
            .secure(self.secure.unwrap_or(token.cookie_secure))
            .same_site(cookie_same_site(self.same_site.unwrap_or(token.same_site)))
            .path(path)
            .max_age(max_age(token.expiry))
            .build();
        if let Some(domain) = self.domain.clone().or_else(|| token.domain.clone()) {
            cookie.set_domain(domain);
        }
        cookie
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CookieLayout {
    domain: Option<String>,
    secure: bool,
    same_site: SameSite,
    access_token_path: String,
    refresh_token_path: String,
    id_refresh_token_path: String,
}

/// Cookies and headers to write on the response of the current request.
#[derive(Debug, Default)]
pub(super) struct SessionUpdates {
    jar: CookieJar,
    headers: HeaderMap,
}

impl SessionUpdates {
    pub(super) fn attach_access_token(&mut self, token: &TokenInfo, overrides: &CookieOverrides) {
        let path = overrides
            .access_token_path
            .clone()
            .unwrap_or_else(|| token.cookie_path.clone());
        self.set_cookie(overrides.token_cookie(ACCESS_TOKEN_COOKIE, token, path));
    }

    pub(super) fn attach_refresh_token(&mut self, token: &TokenInfo, overrides: &CookieOverrides) {
        let path = token.cookie_path.clone();
        self.set_cookie(overrides.token_cookie(REFRESH_TOKEN_COOKIE, token, path));
    }

    /// The id-refresh token goes in a cookie and, readable by the frontend, in a header.
    pub(super) fn set_id_refresh_token(&mut self, token: &TokenInfo, overrides: &CookieOverrides) {
        self.append_header(ID_REFRESH_TOKEN_HEADER, &format!("{};{}", token.token, token.expiry));
        self.expose(ID_REFRESH_TOKEN_HEADER);

        let path = token.cookie_path.clone();
        self.set_cookie(overrides.token_cookie(ID_REFRESH_TOKEN_COOKIE, token, path));
    }

    pub(super) fn set_anti_csrf_token(&mut self, token: &str) {
        self.append_header(ANTI_CSRF_HEADER, token);
        self.expose(ANTI_CSRF_HEADER);
    }

    /// Expire every session cookie and tell the frontend to drop its id-refresh token.
    pub(super) fn clear_session(&mut self, layout: &CookieLayout) {
        for (name, path) in [
            (ACCESS_TOKEN_COOKIE, &layout.access_token_path),
            (REFRESH_TOKEN_COOKIE, &layout.refresh_token_path),
            (ID_REFRESH_TOKEN_COOKIE, &layout.id_refresh_token_path),
        ] {
            let mut cookie = Cookie::build((name, ""))
                .http_only(true)
                .secure(layout.secure)
                .same_site(cookie_same_site(layout.same_site))
                .path(path.clone())
                .max_age(Duration::ZERO)
                .build();
            if let Some(domain) = &layout.domain {
                cookie.set_domain(domain.clone());
            }
            self.set_cookie(cookie);
        }
        self.append_header(ID_REFRESH_TOKEN_HEADER, "remove");
        self.expose(ID_REFRESH_TOKEN_HEADER);
    }

    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        let jar = std::mem::take(&mut self.jar);
        self.jar = jar.add(cookie);
    }

    fn expose(&mut self, name: &'static str) {
        append_header(&mut self.headers, ACCESS_CONTROL_EXPOSE_HEADERS, name);
    }

    fn append_header(&mut self, name: &'static str, value: &str) {
        append_header(&mut self.headers, HeaderName::from_static(name), value);
    }
}

impl IntoResponseParts for SessionUpdates {
    type Error = std::convert::Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let mut res = self.jar.into_response_parts(res)?;
        for (name, value) in &self.headers {
            match res.headers_mut().get(name).and_then(|v| v.to_str().ok()) {
                Some(existing) => {
                    let merged = format!("{existing}, {}", value.to_str().unwrap_or_default());
                    if let Ok(merged) = HeaderValue::from_str(&merged) {
                        res.headers_mut().insert(name.clone(), merged);
                    }
                }
                None => {
                    res.headers_mut().insert(name.clone(), value.clone());
                }
            }
        }
        Ok(res)
    }
}

/// Headers a CORS preflight needs so the browser sends session headers and cookies.
#[must_use]
pub fn options_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [ANTI_CSRF_HEADER, SDK_NAME_HEADER, SDK_VERSION_HEADER] {
        append_header(&mut headers, ACCESS_CONTROL_ALLOW_HEADERS, name);
    }
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers
}

/// Set `name`, joining with `, ` onto any value already present.
fn append_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let joined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {value}"),
        None => value.to_string(),
    };
    match HeaderValue::from_str(&joined) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(e) => tracing::warn!(header = %name, error = %e, "Dropping invalid header value"),
    }
}

pub(super) fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name).map(|c| c.value().to_string())
}

pub(super) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Seconds until `expiry_ms`, rounded up, never negative.
fn max_age(expiry_ms: i64) -> Duration {
    let remaining = expiry_ms.saturating_sub(now_millis());
    if remaining <= 0 {
        return Duration::ZERO;
    }
    Duration::seconds(remaining / 1000 + i64::from(remaining % 1000 != 0))
}

fn cookie_same_site(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::None => CookieSameSite::None,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::Strict => CookieSameSite::Strict,
    }
}
