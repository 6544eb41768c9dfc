//! Request and response cookies.
//!
//! Request `Cookie` headers are parsed once per exchange with the `cookie`
//! crate; response cookies are serialized into `Set-Cookie` values.
//! Values are percent-decoded on the way in and percent-encoded on the way
//! out.

use crate::base::neterror::NetError;
use cookie::Cookie;
use http::header::{HeaderMap, HeaderValue, COOKIE};

/// Parse every `Cookie` header, in header order. Malformed pairs are
/// skipped.
pub fn parse_request_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    let mut cookies = Vec::new();
    for value in headers.get_all(COOKIE) {
        let Ok(line) = value.to_str() else {
            tracing::warn!("ignoring non-ASCII Cookie header");
            continue;
        };
        for parsed in Cookie::split_parse_encoded(line) {
            match parsed {
                Ok(cookie) => cookies.push(cookie.into_owned()),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed cookie"),
            }
        }
    }
    cookies
}

/// The cookie carrying a newly created session id.
pub fn session_cookie(name: &str, id: &str, path: &str, secure: bool) -> Cookie<'static> {
    let path = if path.is_empty() { "/" } else { path };
    Cookie::build((name.to_string(), id.to_string()))
        .path(path.to_string())
        .http_only(true)
        .secure(secure)
        .build()
}

/// `Set-Cookie` header value for `cookie`.
pub fn set_cookie_value(cookie: &Cookie<'_>) -> Result<HeaderValue, NetError> {
    HeaderValue::from_str(&cookie.encoded().to_string()).map_err(|_| NetError::InvalidHeader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1; b=two%20words"));
        headers.append(COOKIE, HeaderValue::from_static("JSESSIONID=XYZ"));
        let cookies = parse_request_cookies(&headers);
        let pairs: Vec<(&str, &str)> = cookies.iter().map(|c| (c.name(), c.value())).collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "two words"), ("JSESSIONID", "XYZ")]);
    }

    #[test]
    fn test_session_cookie_header() {
        let cookie = session_cookie("JSESSIONID", "abc", "/app", false);
        let value = set_cookie_value(&cookie).unwrap();
        let text = value.to_str().unwrap();
        assert!(text.starts_with("JSESSIONID=abc"));
        assert!(text.contains("Path=/app"));
        assert!(text.contains("HttpOnly"));
        assert!(!text.contains("Secure"));
    }

    #[test]
    fn test_empty_context_path_uses_root() {
        let cookie = session_cookie("SID", "x", "", true);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
    }
}
