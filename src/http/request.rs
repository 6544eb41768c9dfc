//! Per-exchange request state.
//!
//! A `Request` lives in its [`ExchangeSlot`](crate::connector::pool::ExchangeSlot)
//! for the life of the slot: bound to an exchange, filled by the adapter,
//! read by the handler through a [`RequestFacade`](super::facade::RequestFacade)
//! and recycled when the exchange completes.

use super::attributes::Attributes;
use super::httpdate::parse_http_date;
use super::locale::parse_accept_language;
use super::parameters::ParameterMap;
use super::response::Response;
use super::BodyAccess;
use crate::base::neterror::NetError;
use crate::buffer::{CharsetCache, Charset};
use crate::channel::InputChannel;
use crate::connector::config::ConnectorConfig;
use crate::cookies::parse_request_cookies;
use crate::exchange::{AttributeValue, ExchangeRef};
use crate::mapping::MappingData;
use crate::session::{RequestedSessionId, Session, SessionIdSource};
use cookie::Cookie;
use http::header::{ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, Method, Version};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use time::OffsetDateTime;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct Request {
    config: Arc<ConnectorConfig>,
    charsets: Arc<CharsetCache>,
    exchange: Option<ExchangeRef>,
    response: Weak<RefCell<Response>>,
    generation: u64,

    method: Method,
    version: Version,
    raw_uri: String,
    decoded_uri: Vec<u8>,
    request_path: String,
    query: Option<String>,
    scheme: String,
    secure: bool,
    server_name: String,
    server_port: u16,

    mapping: MappingData,
    path_params: Vec<(String, String)>,
    requested_session: RequestedSessionId,
    session: Option<Arc<Session>>,
    cookies: Vec<Cookie<'static>>,
    cookies_parsed: bool,
    parameters: ParameterMap,
    locales: Vec<String>,
    locales_parsed: bool,
    attributes: Attributes,
    principal: Option<String>,
    auth_type: Option<String>,
    char_encoding: Option<String>,

    input: InputChannel,
    body: BodyAccess,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("generation", &self.generation)
            .field("bound", &self.exchange.is_some())
            .field("method", &self.method)
            .field("raw_uri", &self.raw_uri)
            .field("request_path", &self.request_path)
            .field("query", &self.query)
            .field("requested_session", &self.requested_session)
            .field("cookies", &self.cookies.len())
            .field("parameters", &self.parameters.len())
            .field("body", &self.body)
            .finish()
    }
}

impl Request {
    pub fn new(config: Arc<ConnectorConfig>, charsets: Arc<CharsetCache>) -> Self {
        let input = InputChannel::new(config.input_buffer_size, &config.default_charset, Arc::clone(&charsets));
        let parameters = ParameterMap::new(config.max_parameter_count);
        Self {
            config,
            charsets,
            exchange: None,
            response: Weak::new(),
            generation: 0,
            method: Method::GET,
            version: Version::HTTP_11,
            raw_uri: String::new(),
            decoded_uri: Vec::new(),
            request_path: String::new(),
            query: None,
            scheme: String::new(),
            secure: false,
            server_name: String::new(),
            server_port: 0,
            mapping: MappingData::default(),
            path_params: Vec::new(),
            requested_session: RequestedSessionId::default(),
            session: None,
            cookies: Vec::new(),
            cookies_parsed: false,
            parameters,
            locales: Vec::new(),
            locales_parsed: false,
            attributes: Attributes::default(),
            principal: None,
            auth_type: None,
            char_encoding: None,
            input,
            body: BodyAccess::None,
        }
    }

    /// Attach to `exchange` and copy the request line out of it.
    pub fn bind(&mut self, exchange: ExchangeRef, response: Weak<RefCell<Response>>) {
        {
            let ex = exchange.borrow();
            self.method = ex.method().clone();
            self.version = ex.version();
            self.raw_uri = ex.raw_path().to_string();
            self.query = ex.query().map(str::to_owned);
        }
        self.input.bind(Rc::clone(&exchange));
        self.exchange = Some(exchange);
        self.response = response;
    }

    pub fn is_bound(&self) -> bool {
        self.exchange.is_some()
    }

    /// Bumped by every recycle; facades from an earlier exchange compare
    /// against it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    // ---- request line and URI ----

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2.0",
            Version::HTTP_3 => "HTTP/3.0",
            _ => "HTTP/1.1",
        }
    }

    /// Request URI as received, minus any session marker.
    pub fn raw_uri(&self) -> &str {
        &self.raw_uri
    }

    pub fn raw_uri_mut(&mut self) -> &mut String {
        &mut self.raw_uri
    }

    pub fn decoded_uri(&self) -> &[u8] {
        &self.decoded_uri
    }

    pub fn decoded_uri_mut(&mut self) -> &mut Vec<u8> {
        &mut self.decoded_uri
    }

    /// Decoded, normalized path used for mapping.
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    pub fn set_request_path(&mut self, path: String) {
        self.request_path = path;
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `scheme://host[:port]/raw-uri`, without the query.
    pub fn request_url(&self) -> String {
        let default_port = if self.scheme == "https" { 443 } else { 80 };
        if self.server_port == default_port || self.server_port == 0 {
            format!("{}://{}{}", self.scheme, self.server_name, self.raw_uri)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.server_name, self.server_port, self.raw_uri)
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_string();
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn set_server_name(&mut self, name: &str) {
        self.server_name = name.to_string();
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn set_server_port(&mut self, port: u16) {
        self.server_port = port;
    }

    // ---- mapping ----

    pub fn mapping(&self) -> &MappingData {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut MappingData {
        &mut self.mapping
    }

    pub fn context_path(&self) -> &str {
        &self.mapping.context_path
    }

    pub fn servlet_path(&self) -> &str {
        &self.mapping.servlet_path
    }

    pub fn path_info(&self) -> Option<&str> {
        self.mapping.path_info.as_deref()
    }

    pub fn set_path_parameters(&mut self, params: Vec<(String, String)>) {
        self.path_params = params;
    }

    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    // ---- headers ----

    fn with_headers<R>(&self, f: impl FnOnce(&http::HeaderMap) -> R) -> Option<R> {
        self.exchange.as_ref().map(|ex| f(ex.borrow().request_headers()))
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.with_headers(|h| h.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned))
            .flatten()
    }

    pub fn headers(&self, name: &str) -> Vec<String> {
        self.with_headers(|h| {
            h.get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn header_names(&self) -> Vec<String> {
        self.with_headers(|h| h.keys().map(|k| k.as_str().to_string()).collect())
            .unwrap_or_default()
    }

    /// Header as an integer; `InvalidHeader` when present but not numeric.
    pub fn int_header(&self, name: &str) -> Result<Option<i64>, NetError> {
        self.header(name)
            .map(|v| v.trim().parse().map_err(|_| NetError::InvalidHeader))
            .transpose()
    }

    /// Header as an HTTP date; `InvalidHeader` when present but not a date.
    pub fn date_header(&self, name: &str) -> Result<Option<OffsetDateTime>, NetError> {
        self.header(name)
            .map(|v| parse_http_date(&v).ok_or(NetError::InvalidHeader))
            .transpose()
    }

    pub fn content_type(&self) -> Option<String> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Explicit encoding, else the `charset` of `Content-Type`.
    pub fn character_encoding(&self) -> Option<String> {
        self.char_encoding
            .clone()
            .or_else(|| self.content_type().and_then(|ct| charset_param(&ct)))
    }

    /// Ignored once the reader is in use.
    pub fn set_character_encoding(&mut self, encoding: &str) -> Result<(), NetError> {
        if self.body == BodyAccess::Chars {
            return Ok(());
        }
        self.charsets.resolve(encoding)?;
        self.char_encoding = Some(encoding.to_string());
        Ok(())
    }

    fn body_charset(&self) -> Charset {
        self.character_encoding()
            .and_then(|name| self.charsets.resolve(&name).ok())
            .or_else(|| self.charsets.resolve(&self.config.default_charset).ok())
            .unwrap_or(Charset::Iso8859_1)
    }

    // ---- cookies and session ----

    /// Parse the `Cookie` headers once per exchange.
    pub fn parse_cookies(&mut self) {
        if self.cookies_parsed {
            return;
        }
        self.cookies_parsed = true;
        if let Some(cookies) = self.with_headers(parse_request_cookies) {
            self.cookies = cookies;
        }
    }

    pub fn cookies(&mut self) -> &[Cookie<'static>] {
        self.parse_cookies();
        &self.cookies
    }

    pub fn requested_session(&self) -> &RequestedSessionId {
        &self.requested_session
    }

    pub fn requested_session_mut(&mut self) -> &mut RequestedSessionId {
        &mut self.requested_session
    }

    pub fn requested_session_id(&self) -> Option<&str> {
        self.requested_session.id()
    }

    pub fn is_requested_session_id_from_cookie(&self) -> bool {
        self.requested_session.source() == SessionIdSource::Cookie
    }

    pub fn is_requested_session_id_from_url(&self) -> bool {
        self.requested_session.source() == SessionIdSource::Url
    }

    pub fn is_requested_session_id_valid(&self) -> bool {
        let (Some(context), Some(id)) = (self.mapping.context.as_ref(), self.requested_session.id()) else {
            return false;
        };
        context.session_store().find(id).is_some()
    }

    /// The current session, creating one when `create` is set.
    ///
    /// A new session's cookie is queued on the response when the context
    /// uses cookies, so creation fails once the response is committed.
    pub fn session(&mut self, create: bool) -> Result<Option<Arc<Session>>, NetError> {
        if let Some(session) = &self.session {
            if session.is_valid() {
                return Ok(Some(Arc::clone(session)));
            }
            self.session = None;
        }
        let Some(context) = self.mapping.context.clone() else {
            return Ok(None);
        };
        let store = context.session_store();

        if let Some(id) = self.requested_session.id() {
            if let Some(session) = store.find(id) {
                session.touch();
                self.session = Some(Arc::clone(&session));
                return Ok(Some(session));
            }
        }
        if !create {
            return Ok(None);
        }

        let response = self.response.upgrade();
        if response.as_ref().is_some_and(|r| r.borrow().is_committed()) {
            return Err(NetError::ResponseCommitted);
        }
        let session = store.create();
        if context.cookies_enabled() {
            if let Some(response) = response {
                let name = context.session_cookie_name(&self.config.session_cookie_name);
                let cookie = crate::cookies::session_cookie(
                    name,
                    session.id(),
                    context.session_cookie_path(),
                    self.secure,
                );
                response.borrow_mut().add_cookie(&cookie)?;
            }
        }
        self.session = Some(Arc::clone(&session));
        Ok(Some(session))
    }

    /// Id of the live session, without creating one.
    pub fn current_session_id(&mut self) -> Option<String> {
        self.session(false)
            .ok()
            .flatten()
            .map(|s| s.id().to_string())
    }

    // ---- parameters ----

    fn ensure_parameters(&mut self) -> Result<(), NetError> {
        if self.parameters.is_parsed() {
            self.parameters.lock();
            return match self.parameters.failure() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            };
        }
        match self.parse_parameters() {
            Ok(()) => {
                self.parameters.set_parsed();
                self.parameters.lock();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "request parameters not parsed");
                self.parameters.fail(e.clone());
                Err(e)
            }
        }
    }

    fn parse_parameters(&mut self) -> Result<(), NetError> {
        let query_charset = if self.config.use_body_encoding_for_uri {
            self.body_charset()
        } else {
            self.charsets
                .resolve(&self.config.uri_encoding)
                .unwrap_or(Charset::Utf8)
        };
        if let Some(query) = self.query.clone() {
            self.parameters.add_encoded(query.as_bytes(), query_charset)?;
        }

        let is_form = self
            .content_type()
            .is_some_and(|ct| ct.split(';').next().is_some_and(|t| t.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE)));
        if self.method != Method::POST || !is_form || self.body != BodyAccess::None {
            return Ok(());
        }
        let limit = self.config.max_post_size;
        if let (Some(limit), Some(length)) = (limit, self.content_length()) {
            if length > limit as u64 {
                tracing::warn!(length, limit, "form body exceeds the POST size limit");
                return Err(NetError::PostTooLarge { limit });
            }
        }
        let body = self.input.read_form_body(limit)?;
        let charset = self.body_charset();
        self.parameters.add_encoded(&body, charset)
    }

    /// Add a parameter before the handler sees the map.
    pub fn add_parameter(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        self.parameters.add(name.to_string(), value.to_string())
    }

    pub fn parameter(&mut self, name: &str) -> Result<Option<String>, NetError> {
        self.ensure_parameters()?;
        Ok(self.parameters.get(name).map(str::to_owned))
    }

    pub fn parameter_values(&mut self, name: &str) -> Result<Vec<String>, NetError> {
        self.ensure_parameters()?;
        Ok(self.parameters.values(name).map(<[String]>::to_vec).unwrap_or_default())
    }

    pub fn parameter_names(&mut self) -> Result<Vec<String>, NetError> {
        self.ensure_parameters()?;
        Ok(self.parameters.names().to_vec())
    }

    pub fn parameter_map(&mut self) -> Result<Vec<(String, Vec<String>)>, NetError> {
        self.ensure_parameters()?;
        Ok(self
            .parameters
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_vec()))
            .collect())
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    // ---- locales ----

    pub fn locales(&mut self) -> Vec<String> {
        if !self.locales_parsed {
            self.locales_parsed = true;
            let values = self.headers(ACCEPT_LANGUAGE.as_str());
            self.locales = parse_accept_language(values.iter().map(String::as_str));
        }
        if self.locales.is_empty() {
            vec![self.config.default_locale.clone()]
        } else {
            self.locales.clone()
        }
    }

    pub fn locale(&mut self) -> String {
        self.locales()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.config.default_locale.clone())
    }

    // ---- attributes ----

    /// Local attribute, else a side-channel value from the transport.
    pub fn attribute(&mut self, name: &str) -> Option<AttributeValue> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value);
        }
        if !crate::exchange::SIDE_CHANNEL_ATTRS.contains(&name) {
            return None;
        }
        let value = self.exchange.as_ref()?.borrow_mut().attribute(name)?;
        self.attributes.set(name, Arc::clone(&value));
        Some(value)
    }

    pub fn set_attribute(&mut self, name: &str, value: AttributeValue) {
        self.attributes.set(name, value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.names()
    }

    // ---- security ----

    pub fn set_principal(&mut self, user: Option<&str>, auth_type: Option<&str>) {
        self.principal = user.map(str::to_owned);
        self.auth_type = auth_type.map(str::to_owned);
    }

    pub fn remote_user(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn auth_type(&self) -> Option<&str> {
        self.auth_type.as_deref()
    }

    // ---- body ----

    fn use_stream(&mut self) -> Result<(), NetError> {
        match self.body {
            BodyAccess::Chars => Err(NetError::ReaderObtained),
            _ => {
                self.body = BodyAccess::Stream;
                Ok(())
            }
        }
    }

    fn use_reader(&mut self) -> Result<(), NetError> {
        match self.body {
            BodyAccess::Stream => Err(NetError::InputStreamObtained),
            BodyAccess::Chars => Ok(()),
            BodyAccess::None => {
                let charset = self.body_charset();
                self.input.set_encoding(charset.name());
                self.body = BodyAccess::Chars;
                Ok(())
            }
        }
    }

    /// Read body bytes; `None` at end of body.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<Option<usize>, NetError> {
        self.use_stream()?;
        self.input.read_bytes(dest)
    }

    pub fn skip(&mut self, n: u64) -> Result<u64, NetError> {
        self.use_stream()?;
        self.input.skip_bytes(n)
    }

    pub fn available(&mut self) -> Result<usize, NetError> {
        self.use_stream()?;
        Ok(self.input.available())
    }

    /// Read body characters; `None` at end of body.
    pub fn read_chars(&mut self, dest: &mut String, max: usize) -> Result<Option<usize>, NetError> {
        self.use_reader()?;
        self.input.read_chars(dest, max)
    }

    /// Next line without its terminator; `None` at end of body.
    pub fn read_line(&mut self) -> Result<Option<String>, NetError> {
        self.use_reader()?;
        let mut line = String::new();
        Ok(self.input.read_line(&mut line)?.then_some(line))
    }

    pub fn skip_chars(&mut self, n: u64) -> Result<u64, NetError> {
        self.use_reader()?;
        self.input.skip_chars(n)
    }

    pub fn mark(&mut self, read_ahead: usize) -> Result<(), NetError> {
        self.use_reader()?;
        self.input.mark(read_ahead)
    }

    pub fn reset(&mut self) -> Result<(), NetError> {
        self.use_reader()?;
        self.input.reset()
    }

    pub fn ready(&mut self) -> Result<bool, NetError> {
        self.use_reader()?;
        Ok(self.input.ready())
    }

    pub fn body_access(&self) -> BodyAccess {
        self.body
    }

    /// End of exchange: no further body reads.
    pub fn finish(&mut self) {
        self.input.close();
    }

    pub fn recycle(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.exchange = None;
        self.response = Weak::new();
        self.method = Method::GET;
        self.version = Version::HTTP_11;
        self.raw_uri.clear();
        self.decoded_uri.clear();
        self.request_path.clear();
        self.query = None;
        self.scheme.clear();
        self.secure = false;
        self.server_name.clear();
        self.server_port = 0;
        self.mapping.recycle();
        self.path_params.clear();
        self.requested_session.clear();
        self.session = None;
        self.cookies.clear();
        self.cookies_parsed = false;
        self.parameters.recycle();
        self.locales.clear();
        self.locales_parsed = false;
        self.attributes.clear();
        self.principal = None;
        self.auth_type = None;
        self.char_encoding = None;
        self.input.recycle();
        self.body = BodyAccess::None;
    }

    /// Whether `name` is a known request header.
    pub fn contains_header(&self, name: &HeaderName) -> bool {
        self.with_headers(|h| h.contains_key(name)).unwrap_or(false)
    }
}

/// `charset` parameter of a `Content-Type` value.
pub(crate) fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
