//! Handler-facing handles over the pooled Request and Response.
//!
//! A facade remembers the generation of the object it was created for.
//! Once the exchange is recycled every call fails with
//! [`NetError::FacadeRecycled`]; a call made while the object is already
//! borrowed (re-entrantly) fails with [`NetError::FacadeBusy`].

use super::request::Request;
use super::response::Response;
use crate::base::neterror::NetError;
use crate::exchange::{AttributeValue, REMOTE_ADDR_ATTR};
use crate::session::Session;
use cookie::Cookie;
use http::{Method, StatusCode};
use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use time::OffsetDateTime;

fn into_io_error(err: NetError) -> io::Error {
    match &err {
        NetError::ClientAbort { kind, .. } => io::Error::new(*kind, err),
        _ => io::Error::other(err),
    }
}

#[derive(Clone)]
pub struct RequestFacade {
    inner: Weak<RefCell<Request>>,
    generation: u64,
}

impl std::fmt::Debug for RequestFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestFacade")
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

impl RequestFacade {
    pub fn new(inner: &Rc<RefCell<Request>>) -> Self {
        let generation = inner.borrow().generation();
        Self {
            inner: Rc::downgrade(inner),
            generation,
        }
    }

    /// Whether the exchange this facade was handed out for is still running.
    pub fn is_live(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| {
            inner
                .try_borrow()
                .map_or(true, |r| r.generation() == self.generation && r.is_bound())
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut Request) -> R) -> Result<R, NetError> {
        let inner = self.inner.upgrade().ok_or(NetError::FacadeRecycled)?;
        let mut request = inner.try_borrow_mut().map_err(|_| NetError::FacadeBusy)?;
        if request.generation() != self.generation || !request.is_bound() {
            return Err(NetError::FacadeRecycled);
        }
        Ok(f(&mut request))
    }

    fn try_with<R>(&self, f: impl FnOnce(&mut Request) -> Result<R, NetError>) -> Result<R, NetError> {
        self.with(f)?
    }

    pub fn method(&self) -> Result<Method, NetError> {
        self.with(|r| r.method().clone())
    }

    pub fn protocol(&self) -> Result<&'static str, NetError> {
        self.with(|r| r.protocol())
    }

    /// Request URI as received (still encoded), without the query.
    pub fn request_uri(&self) -> Result<String, NetError> {
        self.with(|r| r.raw_uri().to_string())
    }

    pub fn request_url(&self) -> Result<String, NetError> {
        self.with(|r| r.request_url())
    }

    pub fn query_string(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.query_string().map(str::to_owned))
    }

    pub fn context_path(&self) -> Result<String, NetError> {
        self.with(|r| r.context_path().to_string())
    }

    pub fn servlet_path(&self) -> Result<String, NetError> {
        self.with(|r| r.servlet_path().to_string())
    }

    pub fn path_info(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.path_info().map(str::to_owned))
    }

    pub fn path_parameter(&self, name: &str) -> Result<Option<String>, NetError> {
        self.with(|r| r.path_parameter(name).map(str::to_owned))
    }

    pub fn scheme(&self) -> Result<String, NetError> {
        self.with(|r| r.scheme().to_string())
    }

    pub fn is_secure(&self) -> Result<bool, NetError> {
        self.with(|r| r.is_secure())
    }

    pub fn server_name(&self) -> Result<String, NetError> {
        self.with(|r| r.server_name().to_string())
    }

    pub fn server_port(&self) -> Result<u16, NetError> {
        self.with(|r| r.server_port())
    }

    pub fn remote_addr(&self) -> Result<Option<SocketAddr>, NetError> {
        self.with(|r| {
            r.attribute(REMOTE_ADDR_ATTR)
                .and_then(|v| v.downcast_ref::<SocketAddr>().copied())
        })
    }

    pub fn header(&self, name: &str) -> Result<Option<String>, NetError> {
        self.with(|r| r.header(name))
    }

    pub fn headers(&self, name: &str) -> Result<Vec<String>, NetError> {
        self.with(|r| r.headers(name))
    }

    pub fn header_names(&self) -> Result<Vec<String>, NetError> {
        self.with(|r| r.header_names())
    }

    pub fn int_header(&self, name: &str) -> Result<Option<i64>, NetError> {
        self.try_with(|r| r.int_header(name))
    }

    pub fn date_header(&self, name: &str) -> Result<Option<OffsetDateTime>, NetError> {
        self.try_with(|r| r.date_header(name))
    }

    pub fn content_type(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.content_type())
    }

    pub fn content_length(&self) -> Result<Option<u64>, NetError> {
        self.with(|r| r.content_length())
    }

    pub fn character_encoding(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.character_encoding())
    }

    pub fn set_character_encoding(&self, encoding: &str) -> Result<(), NetError> {
        self.try_with(|r| r.set_character_encoding(encoding))
    }

    pub fn cookies(&self) -> Result<Vec<Cookie<'static>>, NetError> {
        self.with(|r| r.cookies().to_vec())
    }

    pub fn parameter(&self, name: &str) -> Result<Option<String>, NetError> {
        self.try_with(|r| r.parameter(name))
    }

    pub fn parameter_values(&self, name: &str) -> Result<Vec<String>, NetError> {
        self.try_with(|r| r.parameter_values(name))
    }

    pub fn parameter_names(&self) -> Result<Vec<String>, NetError> {
        self.try_with(|r| r.parameter_names())
    }

    pub fn parameter_map(&self) -> Result<Vec<(String, Vec<String>)>, NetError> {
        self.try_with(|r| r.parameter_map())
    }

    pub fn locale(&self) -> Result<String, NetError> {
        self.with(|r| r.locale())
    }

    pub fn locales(&self) -> Result<Vec<String>, NetError> {
        self.with(|r| r.locales())
    }

    pub fn attribute(&self, name: &str) -> Result<Option<AttributeValue>, NetError> {
        self.with(|r| r.attribute(name))
    }

    pub fn set_attribute(&self, name: &str, value: AttributeValue) -> Result<(), NetError> {
        self.with(|r| r.set_attribute(name, value))
    }

    pub fn remove_attribute(&self, name: &str) -> Result<Option<AttributeValue>, NetError> {
        self.with(|r| r.remove_attribute(name))
    }

    pub fn attribute_names(&self) -> Result<Vec<String>, NetError> {
        self.with(|r| r.attribute_names())
    }

    pub fn session(&self, create: bool) -> Result<Option<Arc<Session>>, NetError> {
        self.try_with(|r| r.session(create))
    }

    pub fn requested_session_id(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.requested_session_id().map(str::to_owned))
    }

    pub fn is_requested_session_id_valid(&self) -> Result<bool, NetError> {
        self.with(|r| r.is_requested_session_id_valid())
    }

    pub fn is_requested_session_id_from_cookie(&self) -> Result<bool, NetError> {
        self.with(|r| r.is_requested_session_id_from_cookie())
    }

    pub fn is_requested_session_id_from_url(&self) -> Result<bool, NetError> {
        self.with(|r| r.is_requested_session_id_from_url())
    }

    pub fn remote_user(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.remote_user().map(str::to_owned))
    }

    pub fn auth_type(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.auth_type().map(str::to_owned))
    }

    /// Read body bytes; `None` at end of body.
    pub fn read_bytes(&self, dest: &mut [u8]) -> Result<Option<usize>, NetError> {
        self.try_with(|r| r.read(dest))
    }

    pub fn skip(&self, n: u64) -> Result<u64, NetError> {
        self.try_with(|r| r.skip(n))
    }

    pub fn available(&self) -> Result<usize, NetError> {
        self.try_with(|r| r.available())
    }

    pub fn read_chars(&self, dest: &mut String, max: usize) -> Result<Option<usize>, NetError> {
        self.try_with(|r| r.read_chars(dest, max))
    }

    pub fn read_line(&self) -> Result<Option<String>, NetError> {
        self.try_with(|r| r.read_line())
    }

    pub fn skip_chars(&self, n: u64) -> Result<u64, NetError> {
        self.try_with(|r| r.skip_chars(n))
    }

    pub fn mark(&self, read_ahead: usize) -> Result<(), NetError> {
        self.try_with(|r| r.mark(read_ahead))
    }

    pub fn reset(&self) -> Result<(), NetError> {
        self.try_with(|r| r.reset())
    }

    pub fn ready(&self) -> Result<bool, NetError> {
        self.try_with(|r| r.ready())
    }
}

impl io::Read for RequestFacade {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf)
            .map(|n| n.unwrap_or(0))
            .map_err(into_io_error)
    }
}

#[derive(Clone)]
pub struct ResponseFacade {
    inner: Weak<RefCell<Response>>,
    generation: u64,
}

impl std::fmt::Debug for ResponseFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFacade")
            .field("generation", &self.generation)
            .finish()
    }
}

impl ResponseFacade {
    pub fn new(inner: &Rc<RefCell<Response>>) -> Self {
        let generation = inner.borrow().generation();
        Self {
            inner: Rc::downgrade(inner),
            generation,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Response) -> R) -> Result<R, NetError> {
        let inner = self.inner.upgrade().ok_or(NetError::FacadeRecycled)?;
        let mut response = inner.try_borrow_mut().map_err(|_| NetError::FacadeBusy)?;
        if response.generation() != self.generation || !response.is_bound() {
            return Err(NetError::FacadeRecycled);
        }
        Ok(f(&mut response))
    }

    fn try_with<R>(&self, f: impl FnOnce(&mut Response) -> Result<R, NetError>) -> Result<R, NetError> {
        self.with(f)?
    }

    pub fn status(&self) -> Result<StatusCode, NetError> {
        self.with(|r| r.status())
    }

    pub fn set_status(&self, status: StatusCode) -> Result<(), NetError> {
        self.with(|r| r.set_status(status))
    }

    pub fn send_error(&self, status: StatusCode, message: Option<&str>) -> Result<(), NetError> {
        self.try_with(|r| r.send_error(status, message))
    }

    pub fn send_redirect(&self, location: &str) -> Result<(), NetError> {
        self.try_with(|r| r.send_redirect(location))
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), NetError> {
        self.try_with(|r| r.set_header(name, value))
    }

    pub fn add_header(&self, name: &str, value: &str) -> Result<(), NetError> {
        self.try_with(|r| r.add_header(name, value))
    }

    pub fn set_int_header(&self, name: &str, value: i64) -> Result<(), NetError> {
        self.try_with(|r| r.set_int_header(name, value))
    }

    pub fn add_int_header(&self, name: &str, value: i64) -> Result<(), NetError> {
        self.try_with(|r| r.add_int_header(name, value))
    }

    pub fn set_date_header(&self, name: &str, value: OffsetDateTime) -> Result<(), NetError> {
        self.try_with(|r| r.set_date_header(name, value))
    }

    pub fn add_date_header(&self, name: &str, value: OffsetDateTime) -> Result<(), NetError> {
        self.try_with(|r| r.add_date_header(name, value))
    }

    pub fn contains_header(&self, name: &str) -> Result<bool, NetError> {
        self.with(|r| r.contains_header(name))
    }

    pub fn header(&self, name: &str) -> Result<Option<String>, NetError> {
        self.with(|r| r.header(name))
    }

    pub fn headers(&self, name: &str) -> Result<Vec<String>, NetError> {
        self.with(|r| r.headers(name))
    }

    pub fn header_names(&self) -> Result<Vec<String>, NetError> {
        self.with(|r| r.header_names())
    }

    pub fn add_cookie(&self, cookie: &Cookie<'_>) -> Result<(), NetError> {
        self.try_with(|r| r.add_cookie(cookie))
    }

    pub fn set_content_length(&self, length: u64) -> Result<(), NetError> {
        self.try_with(|r| r.set_content_length(length))
    }

    pub fn set_content_type(&self, content_type: Option<&str>) -> Result<(), NetError> {
        self.try_with(|r| r.set_content_type(content_type))
    }

    pub fn content_type(&self) -> Result<Option<String>, NetError> {
        self.with(|r| r.content_type())
    }

    pub fn character_encoding(&self) -> Result<String, NetError> {
        self.with(|r| r.character_encoding().to_string())
    }

    pub fn set_character_encoding(&self, encoding: &str) -> Result<(), NetError> {
        self.try_with(|r| r.set_character_encoding(encoding))
    }

    pub fn locale(&self) -> Result<String, NetError> {
        self.with(|r| r.locale().to_string())
    }

    pub fn set_locale(&self, tag: &str) -> Result<(), NetError> {
        self.try_with(|r| r.set_locale(tag))
    }

    pub fn encode_url(&self, url: &str) -> Result<String, NetError> {
        self.with(|r| r.encode_url(url))
    }

    pub fn encode_redirect_url(&self, url: &str) -> Result<String, NetError> {
        self.with(|r| r.encode_redirect_url(url))
    }

    /// Byte body write; excludes [`write_str`](Self::write_str).
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), NetError> {
        self.try_with(|r| r.write(data))
    }

    /// Character body write; excludes [`write_bytes`](Self::write_bytes).
    pub fn write_str(&self, text: &str) -> Result<(), NetError> {
        self.try_with(|r| r.write_str(text))
    }

    pub fn flush_buffer(&self) -> Result<(), NetError> {
        self.try_with(|r| r.flush())
    }

    pub fn buffer_size(&self) -> Result<usize, NetError> {
        self.with(|r| r.buffer_size())
    }

    pub fn set_buffer_size(&self, size: usize) -> Result<(), NetError> {
        self.try_with(|r| r.set_buffer_size(size))
    }

    pub fn is_committed(&self) -> Result<bool, NetError> {
        self.with(|r| r.is_committed())
    }

    pub fn reset(&self) -> Result<(), NetError> {
        self.try_with(|r| r.reset())
    }

    pub fn reset_buffer(&self) -> Result<(), NetError> {
        self.try_with(|r| r.reset_buffer())
    }
}

impl io::Write for ResponseFacade {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(into_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer().map_err(into_io_error)
    }
}
