//! Per-exchange response state.
//!
//! Status and headers are written straight through to the exchange; the
//! body goes through the [`OutputChannel`]. Header changes after commit are
//! ignored, resets after commit are errors.

use super::httpdate::format_http_date;
use super::request::{charset_param, Request};
use super::BodyAccess;
use crate::base::neterror::NetError;
use crate::buffer::CharsetCache;
use crate::channel::OutputChannel;
use crate::connector::config::ConnectorConfig;
use crate::cookies::set_cookie_value;
use crate::exchange::ExchangeRef;
use cookie::Cookie;
use http::header::{HeaderName, HeaderValue, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

pub struct Response {
    config: Arc<ConnectorConfig>,
    exchange: Option<ExchangeRef>,
    request: Weak<RefCell<Request>>,
    generation: u64,
    output: OutputChannel,
    content_type: Option<String>,
    character_encoding: Option<String>,
    charset_set: bool,
    locale: Option<String>,
    body: BodyAccess,
    error: bool,
    message: Option<String>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("generation", &self.generation)
            .field("bound", &self.exchange.is_some())
            .field("content_type", &self.content_type)
            .field("character_encoding", &self.character_encoding)
            .field("body", &self.body)
            .field("error", &self.error)
            .field("output", &self.output)
            .finish()
    }
}

fn header_name(name: &str) -> Result<HeaderName, NetError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| NetError::InvalidHeader)
}

fn header_value(value: &str) -> Result<HeaderValue, NetError> {
    HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)
}

impl Response {
    pub fn new(config: Arc<ConnectorConfig>, charsets: Arc<CharsetCache>) -> Self {
        let output = OutputChannel::new(config.output_buffer_size, &config.default_charset, charsets);
        Self {
            config,
            exchange: None,
            request: Weak::new(),
            generation: 0,
            output,
            content_type: None,
            character_encoding: None,
            charset_set: false,
            locale: None,
            body: BodyAccess::None,
            error: false,
            message: None,
        }
    }

    pub fn bind(&mut self, exchange: ExchangeRef, request: Weak<RefCell<Request>>) {
        self.output.bind(Rc::clone(&exchange));
        self.exchange = Some(exchange);
        self.request = request;
    }

    pub fn is_bound(&self) -> bool {
        self.exchange.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn exchange(&self) -> Result<&ExchangeRef, NetError> {
        self.exchange.as_ref().ok_or(NetError::StreamClosed)
    }

    /// Run `f` on the header map unless the response is committed.
    fn edit_headers(&self, f: impl FnOnce(&mut HeaderMap)) -> Result<(), NetError> {
        let mut exchange = self.exchange()?.borrow_mut();
        if !exchange.is_committed() {
            f(exchange.response_headers_mut());
        }
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.exchange
            .as_ref()
            .is_some_and(|ex| ex.borrow().is_committed())
    }

    // ---- status ----

    pub fn status(&self) -> StatusCode {
        self.exchange
            .as_ref()
            .map_or(StatusCode::OK, |ex| ex.borrow().status())
    }

    /// Ignored once committed.
    pub fn set_status(&mut self, status: StatusCode) {
        if let Some(exchange) = &self.exchange {
            let mut exchange = exchange.borrow_mut();
            if !exchange.is_committed() {
                exchange.set_status(status);
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Error response: drops buffered content and suspends further writes.
    pub fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<(), NetError> {
        if self.is_committed() {
            return Err(NetError::ResponseCommitted);
        }
        self.set_status(status);
        self.error = true;
        self.message = message.map(str::to_owned);
        self.output.reset()?;
        self.output.set_suspended(true);
        Ok(())
    }

    /// 302 to `location`, resolved against the request URL.
    pub fn send_redirect(&mut self, location: &str) -> Result<(), NetError> {
        if self.is_committed() {
            return Err(NetError::ResponseCommitted);
        }
        let absolute = self.absolute_location(location)?;
        self.output.reset()?;
        self.set_status(StatusCode::FOUND);
        self.set_header_value(LOCATION, header_value(&absolute)?)?;
        self.output.set_suspended(true);
        Ok(())
    }

    fn absolute_location(&self, location: &str) -> Result<String, NetError> {
        if let Ok(url) = Url::parse(location) {
            return Ok(url.to_string());
        }
        let request = self.request.upgrade().ok_or(NetError::InvalidRedirect)?;
        let base = request.borrow().request_url();
        let base = Url::parse(&base).map_err(|_| NetError::InvalidRedirect)?;
        base.join(location)
            .map(|url| url.to_string())
            .map_err(|_| NetError::InvalidRedirect)
    }

    // ---- headers ----

    fn set_header_value(&self, name: HeaderName, value: HeaderValue) -> Result<(), NetError> {
        self.edit_headers(|h| {
            h.insert(name, value);
        })
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let name = header_name(name)?;
        if name == CONTENT_TYPE {
            return self.set_content_type(Some(value));
        }
        self.set_header_value(name, header_value(value)?)
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let name = header_name(name)?;
        if name == CONTENT_TYPE {
            return self.set_content_type(Some(value));
        }
        let value = header_value(value)?;
        self.edit_headers(|h| {
            h.append(name, value);
        })
    }

    pub fn set_int_header(&mut self, name: &str, value: i64) -> Result<(), NetError> {
        self.set_header(name, &value.to_string())
    }

    pub fn add_int_header(&mut self, name: &str, value: i64) -> Result<(), NetError> {
        self.add_header(name, &value.to_string())
    }

    pub fn set_date_header(&mut self, name: &str, value: OffsetDateTime) -> Result<(), NetError> {
        self.set_header(name, &format_http_date(value))
    }

    pub fn add_date_header(&mut self, name: &str, value: OffsetDateTime) -> Result<(), NetError> {
        self.add_header(name, &format_http_date(value))
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.exchange.as_ref().is_some_and(|ex| ex.borrow().response_headers().contains_key(name))
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let exchange = self.exchange.as_ref()?.borrow();
        exchange
            .response_headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn headers(&self, name: &str) -> Vec<String> {
        self.exchange.as_ref().map_or_else(Vec::new, |ex| {
            ex.borrow()
                .response_headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_owned)
                .collect()
        })
    }

    pub fn header_names(&self) -> Vec<String> {
        self.exchange.as_ref().map_or_else(Vec::new, |ex| {
            ex.borrow()
                .response_headers()
                .keys()
                .map(|k| k.as_str().to_string())
                .collect()
        })
    }

    pub fn add_cookie(&mut self, cookie: &Cookie<'_>) -> Result<(), NetError> {
        let value = set_cookie_value(cookie)?;
        self.edit_headers(|h| {
            h.append(SET_COOKIE, value);
        })
    }

    // ---- content negotiation ----

    pub fn set_content_length(&mut self, length: u64) -> Result<(), NetError> {
        self.set_header_value(CONTENT_LENGTH, HeaderValue::from(length))
    }

    /// Media type plus an optional `charset` parameter. The charset is
    /// taken unless the writer is already in use.
    pub fn set_content_type(&mut self, content_type: Option<&str>) -> Result<(), NetError> {
        if self.is_committed() {
            return Ok(());
        }
        let Some(content_type) = content_type else {
            self.content_type = None;
            if self.body != BodyAccess::Chars {
                self.character_encoding = None;
                self.charset_set = false;
            }
            return self.edit_headers(|h| {
                h.remove(CONTENT_TYPE);
            });
        };
        let media_type = content_type.split(';').next().unwrap_or("").trim();
        self.content_type = Some(media_type.to_string());
        if let Some(charset) = charset_param(content_type) {
            if self.body != BodyAccess::Chars {
                self.character_encoding = Some(charset);
                self.charset_set = true;
            }
        }
        self.sync_content_type()
    }

    pub fn content_type(&self) -> Option<String> {
        let media_type = self.content_type.as_ref()?;
        Some(if self.charset_set {
            format!("{media_type};charset={}", self.character_encoding())
        } else {
            media_type.clone()
        })
    }

    fn sync_content_type(&self) -> Result<(), NetError> {
        match self.content_type() {
            Some(value) => self.set_header_value(CONTENT_TYPE, header_value(&value)?),
            None => Ok(()),
        }
    }

    pub fn character_encoding(&self) -> &str {
        self.character_encoding
            .as_deref()
            .unwrap_or(&self.config.default_charset)
    }

    /// Ignored once committed or once the writer is in use.
    pub fn set_character_encoding(&mut self, encoding: &str) -> Result<(), NetError> {
        if self.is_committed() || self.body == BodyAccess::Chars {
            return Ok(());
        }
        self.character_encoding = Some(encoding.to_string());
        self.charset_set = true;
        self.sync_content_type()
    }

    pub fn locale(&self) -> &str {
        self.locale.as_deref().unwrap_or(&self.config.default_locale)
    }

    /// Sets `Content-Language` and, unless a charset was given explicitly,
    /// the configured charset for the locale.
    pub fn set_locale(&mut self, tag: &str) -> Result<(), NetError> {
        if self.is_committed() {
            return Ok(());
        }
        self.locale = Some(tag.to_string());
        self.set_header_value(CONTENT_LANGUAGE, header_value(tag)?)?;
        if self.charset_set || self.body == BodyAccess::Chars {
            return Ok(());
        }
        if let Some(encoding) = self.config.locale_encoding(tag) {
            self.character_encoding = Some(encoding.to_string());
            self.sync_content_type()?;
        }
        Ok(())
    }

    // ---- URL rewriting ----

    /// `url` with `;<param>=<id>` inserted when the session id cannot
    /// travel in a cookie.
    pub fn encode_url(&self, url: &str) -> String {
        match self.session_for_url(url) {
            Some(id) => insert_session_id(url, &self.config.session_path_param, &id),
            None => url.to_string(),
        }
    }

    pub fn encode_redirect_url(&self, url: &str) -> String {
        self.encode_url(url)
    }

    fn session_for_url(&self, url: &str) -> Option<String> {
        let request = self.request.upgrade()?;
        let mut request = request.try_borrow_mut().ok()?;
        let context = request.mapping().context.clone()?;
        if !context.url_rewriting_enabled() || request.is_requested_session_id_from_cookie() {
            return None;
        }
        if !is_same_origin(&request, url) {
            return None;
        }
        request.current_session_id()
    }

    // ---- body ----

    fn use_stream(&mut self) -> Result<(), NetError> {
        match self.body {
            BodyAccess::Chars => Err(NetError::WriterObtained),
            _ => {
                self.body = BodyAccess::Stream;
                Ok(())
            }
        }
    }

    fn use_writer(&mut self) -> Result<(), NetError> {
        match self.body {
            BodyAccess::Stream => Err(NetError::OutputStreamObtained),
            BodyAccess::Chars => Ok(()),
            BodyAccess::None => {
                let encoding = self.character_encoding().to_string();
                self.charset_set = true;
                self.character_encoding = Some(encoding.clone());
                self.output.set_encoding(&encoding);
                self.sync_content_type()?;
                self.body = BodyAccess::Chars;
                Ok(())
            }
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), NetError> {
        self.use_stream()?;
        self.output.write_bytes(data)
    }

    pub fn write_str(&mut self, text: &str) -> Result<(), NetError> {
        self.use_writer()?;
        self.output.write_chars(text)
    }

    pub fn flush(&mut self) -> Result<(), NetError> {
        self.output.flush()
    }

    pub fn buffer_size(&self) -> usize {
        self.output.buffer_size()
    }

    pub fn set_buffer_size(&mut self, size: usize) -> Result<(), NetError> {
        self.output.set_buffer_size(size)
    }

    pub fn is_suspended(&self) -> bool {
        self.output.is_suspended()
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.output.set_suspended(suspended);
    }

    pub fn body_access(&self) -> BodyAccess {
        self.body
    }

    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    /// Drop buffered body content.
    pub fn reset_buffer(&mut self) -> Result<(), NetError> {
        self.output.reset()
    }

    /// Drop buffered content, status and headers.
    pub fn reset(&mut self) -> Result<(), NetError> {
        if self.is_committed() {
            return Err(NetError::ResponseCommitted);
        }
        self.output.reset()?;
        {
            let mut exchange = self.exchange()?.borrow_mut();
            exchange.set_status(StatusCode::OK);
            exchange.response_headers_mut().clear();
        }
        self.content_type = None;
        self.character_encoding = None;
        self.charset_set = false;
        self.locale = None;
        self.body = BodyAccess::None;
        self.error = false;
        self.message = None;
        Ok(())
    }

    /// Completion: sends what is staged, with a computed length if possible.
    pub fn finish(&mut self) -> Result<(), NetError> {
        self.output.close()
    }

    pub fn recycle(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.exchange = None;
        self.request = Weak::new();
        self.output.recycle();
        self.content_type = None;
        self.character_encoding = None;
        self.charset_set = false;
        self.locale = None;
        self.body = BodyAccess::None;
        self.error = false;
        self.message = None;
    }
}

fn is_same_origin(request: &Request, url: &str) -> bool {
    let Ok(target) = Url::parse(url) else {
        // Relative reference.
        return !url.starts_with("//");
    };
    let Ok(base) = Url::parse(&request.request_url()) else {
        return false;
    };
    target.scheme() == base.scheme()
        && target.host_str() == base.host_str()
        && target.port_or_known_default() == base.port_or_known_default()
}

/// Insert `;<param>=<id>` at the end of the path part of `url`.
pub fn insert_session_id(url: &str, param: &str, id: &str) -> String {
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    let mut out = String::with_capacity(url.len() + param.len() + id.len() + 2);
    out.push_str(&url[..path_end]);
    out.push(';');
    out.push_str(param);
    out.push('=');
    out.push_str(id);
    out.push_str(&url[path_end..]);
    out
}
