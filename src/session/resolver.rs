//! Session identifier resolution from the URL and from cookies.

/// Where the requested session id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionIdSource {
    #[default]
    Unset,
    Url,
    Cookie,
}

/// The session id a client asked for, with its origin.
///
/// Transitions:
///
/// | current  | URL id offered | first cookie | later duplicate cookie            |
/// |----------|----------------|--------------|-----------------------------------|
/// | `Unset`  | `Url`          | `Cookie`     | n/a                               |
/// | `Url`    | unchanged      | `Cookie`     | n/a                               |
/// | `Cookie` | unchanged      | n/a          | replaces only an id that is not valid |
///
/// A cookie always overrides a URL id. A duplicate cookie never displaces
/// an id that still names a valid session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedSessionId {
    id: Option<String>,
    source: SessionIdSource,
}

impl RequestedSessionId {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn source(&self) -> SessionIdSource {
        self.source
    }

    pub fn is_from_url(&self) -> bool {
        self.source == SessionIdSource::Url
    }

    pub fn is_from_cookie(&self) -> bool {
        self.source == SessionIdSource::Cookie
    }

    /// Offer an id found in the path. Returns whether it was taken.
    pub fn offer_url(&mut self, id: impl Into<String>) -> bool {
        if self.source == SessionIdSource::Cookie {
            return false;
        }
        self.id = Some(id.into());
        self.source = SessionIdSource::Url;
        true
    }

    /// Offer an id from a session cookie. `is_valid` is asked about the
    /// current id only when a cookie id is already held.
    pub fn offer_cookie(&mut self, id: &str, is_valid: impl FnOnce(&str) -> bool) -> bool {
        match self.source {
            SessionIdSource::Unset | SessionIdSource::Url => {}
            SessionIdSource::Cookie => {
                if self.id.as_deref().is_some_and(is_valid) {
                    return false;
                }
            }
        }
        self.id = Some(id.to_string());
        self.source = SessionIdSource::Cookie;
        true
    }

    /// Run the cookie phase over `(name, value)` pairs in header order.
    pub fn apply_cookies<'a, I>(&mut self, cookies: I, cookie_name: &str, is_valid: impl Fn(&str) -> bool)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in cookies {
            if name == cookie_name {
                self.offer_cookie(value, &is_valid);
            }
        }
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.source = SessionIdSource::Unset;
    }
}

/// Cut `;<param>=<value>` out of the working path and the raw path.
///
/// Runs on the still percent-encoded path, before decoding and
/// normalization. The value runs to the next `;` or the end of the path.
/// Returns the value when the marker was present in the working path.
pub fn strip_session_from_path(decoded: &mut Vec<u8>, raw: &mut String, param: &str) -> Option<String> {
    let marker = format!(";{param}=");
    let start = decoded
        .windows(marker.len())
        .position(|w| w == marker.as_bytes())?;
    let value_start = start + marker.len();
    let end = decoded[value_start..]
        .iter()
        .position(|&b| b == b';')
        .map_or(decoded.len(), |p| value_start + p);
    let id = String::from_utf8_lossy(&decoded[value_start..end]).into_owned();
    decoded.drain(start..end);

    if let Some(raw_start) = raw.find(&marker) {
        let raw_value = raw_start + marker.len();
        let raw_end = raw[raw_value..].find(';').map_or(raw.len(), |p| raw_value + p);
        raw.replace_range(raw_start..raw_end, "");
    }
    Some(id)
}
