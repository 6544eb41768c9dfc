//! Connector configuration.
//!
//! One [`ConnectorConfig`] is shared (by `Arc`) by the adapter and every
//! exchange slot it serves.

use crate::base::neterror::NetError;
use serde::Deserialize;
use std::collections::HashMap;

/// Configuration options for an [`Adapter`](super::adapter::Adapter).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Scheme reported when the transport does not know it.
    pub scheme: String,

    /// Secure flag reported when the transport does not know the scheme.
    pub secure: bool,

    /// Server name reported to handlers instead of the `Host` header.
    pub proxy_name: Option<String>,

    /// Server port reported to handlers instead of the local port.
    pub proxy_port: Option<u16>,

    /// Charset used to turn the decoded path into text.
    pub uri_encoding: String,

    /// Decode the query string with the body's charset instead of
    /// `uri_encoding`.
    pub use_body_encoding_for_uri: bool,

    /// Accept `%2F` and `%5C` in the path.
    pub allow_encoded_slash: bool,

    /// Dispatch TRACE requests instead of answering 405.
    pub allow_trace: bool,

    /// Largest form body parsed into parameters (None = unlimited).
    pub max_post_size: Option<usize>,

    /// Most parameters accepted per request (None = unlimited).
    pub max_parameter_count: Option<usize>,

    /// Request body staging size.
    pub input_buffer_size: usize,

    /// Response body staging size.
    pub output_buffer_size: usize,

    /// Body charset when none is declared.
    pub default_charset: String,

    /// Session cookie name when the context does not set one.
    pub session_cookie_name: String,

    /// Path parameter carrying the session id in URLs.
    pub session_path_param: String,

    /// Locale reported when the request has no `Accept-Language`.
    pub default_locale: String,

    /// Response charset per language tag, used by `set_locale`.
    pub locale_encodings: HashMap<String, String>,

    /// `X-Powered-By` value, when one should be sent.
    pub x_powered_by: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            secure: false,
            proxy_name: None,
            proxy_port: None,
            uri_encoding: "UTF-8".to_string(),
            use_body_encoding_for_uri: false,
            allow_encoded_slash: false,
            allow_trace: false,
            max_post_size: Some(2 * 1024 * 1024),
            max_parameter_count: Some(10_000),
            input_buffer_size: crate::buffer::DEFAULT_BUFFER_SIZE,
            output_buffer_size: crate::buffer::DEFAULT_BUFFER_SIZE,
            default_charset: "ISO-8859-1".to_string(),
            session_cookie_name: "JSESSIONID".to_string(),
            session_path_param: "jsessionid".to_string(),
            default_locale: "en-US".to_string(),
            locale_encodings: HashMap::new(),
            x_powered_by: None,
        }
    }
}

impl ConnectorConfig {
    /// Load from JSON; absent fields keep their defaults.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: ConnectorConfig =
            serde_json::from_str(json).map_err(|e| NetError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.input_buffer_size == 0 || self.output_buffer_size == 0 {
            return Err(NetError::invalid_config("buffer sizes must be non-zero"));
        }
        if self.session_cookie_name.is_empty() || self.session_path_param.is_empty() {
            return Err(NetError::invalid_config("session names must be non-empty"));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(NetError::invalid_config(format!("unknown scheme {}", self.scheme)));
        }
        Ok(())
    }

    /// Charset for a language tag: the full tag first, then its language.
    pub fn locale_encoding(&self, tag: &str) -> Option<&str> {
        self.locale_encodings
            .get(tag)
            .or_else(|| self.locale_encodings.get(&crate::http::locale::language(tag)))
            .map(String::as_str)
    }
}
