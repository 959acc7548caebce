//! Route handlers and the request plumbing they share: session cookies, client
//! origin, anti-forgery token lookup and the JSON reply envelope.

pub mod face;
pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod reference;
pub mod register;
pub mod root;

use axum::{
    extract::ConnectInfo,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use utoipa::ToSchema;

use super::state::GatewayConfig;

pub const SESSION_COOKIE_NAME: &str = "votegate_session";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// JSON envelope shared by the login, registration and face endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiReply {
    /// `success`, `error`, `no_face` or `no_match`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl ApiReply {
    #[must_use]
    pub fn success(message: Option<String>, redirect: Option<&str>) -> Self {
        Self {
            status: "success".to_string(),
            message,
            redirect: redirect.map(str::to_string),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            redirect: None,
        }
    }

    #[must_use]
    pub fn with_status(status: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.into()),
            redirect: None,
        }
    }

    pub(crate) fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Build the `HttpOnly` cookie carrying the session id.
pub(crate) fn session_cookie(
    config: &GatewayConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(
    config: &GatewayConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Session id from the cookie, or from a bearer token for non-browser clients.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Anti-forgery token from the header, falling back to the form field.
pub(crate) fn presented_csrf_token(headers: &HeaderMap, field: Option<&str>) -> Option<String> {
    headers
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .or(field)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Client IP announced by a reverse proxy. Only hops that parse as an address count.
fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str, first_hop: bool| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                if first_hop {
                    value.split(',').next()
                } else {
                    Some(value)
                }
            })
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };
    header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false))
}

/// Origin used for login rate limiting. The peer address is authoritative unless the
/// gateway is configured to sit behind a trusted proxy.
pub(crate) fn client_origin(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    trust_forwarded: bool,
) -> String {
    trust_forwarded
        .then(|| forwarded_client_ip(headers))
        .flatten()
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip()))
        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_sets_flags() -> anyhow::Result<()> {
        let config = GatewayConfig::new("https://vote.example".to_string())
            .with_session_ttl_seconds(60);
        let cookie = session_cookie(&config, "abc")?;
        assert_eq!(
            cookie.to_str()?,
            "votegate_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure"
        );
        let cleared = clear_session_cookie(&config)?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn extracts_session_from_cookie_or_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; votegate_session=tok123"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok123"));

        let mut bearer = HeaderMap::new();
        bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok456"));
        assert_eq!(extract_session_token(&bearer).as_deref(), Some("tok456"));

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("votegate_session="));
        assert_eq!(extract_session_token(&empty), None);
    }

    #[test]
    fn csrf_header_wins_over_field() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            presented_csrf_token(&headers, Some("field")).as_deref(),
            Some("field")
        );
        headers.insert(CSRF_HEADER_NAME, HeaderValue::from_static("header"));
        assert_eq!(
            presented_csrf_token(&headers, Some("field")).as_deref(),
            Some("header")
        );
        assert_eq!(presented_csrf_token(&HeaderMap::new(), Some("  ")), None);
    }

    #[test]
    fn origin_ignores_forwarded_headers_by_default() {
        let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        let mut headers = HeaderMap::new();
        assert_eq!(client_origin(&headers, Some(&peer), false), "192.0.2.1");
        assert_eq!(client_origin(&headers, None, false), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_origin(&headers, Some(&peer), false), "192.0.2.1");
        assert_eq!(client_origin(&headers, None, false), "unknown");
    }

    #[test]
    fn origin_uses_forwarded_headers_behind_trusted_proxy() {
        let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        let mut headers = HeaderMap::new();
        assert_eq!(client_origin(&headers, Some(&peer), true), "192.0.2.1");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_origin(&headers, Some(&peer), true), "198.51.100.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("2001:db8::1, 10.0.0.1"),
        );
        assert_eq!(client_origin(&headers, Some(&peer), true), "2001:db8::1");
    }

    #[test]
    fn origin_rejects_unparseable_forwarded_hops() {
        let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("not-an-ip-but-a-very-long-rotating-value-0000000001"),
        );
        assert_eq!(client_origin(&headers, Some(&peer), true), "192.0.2.1");

        headers.insert("x-real-ip", HeaderValue::from_static("unknown"));
        assert_eq!(client_origin(&headers, None, true), "unknown");
    }
}
