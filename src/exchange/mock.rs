//! Scripted in-memory transport for tests.

use crate::exchange::{AttributeValue, Exchange};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::sync::Arc;

/// In-memory [`Exchange`]: the body is delivered one chunk per
/// `read_body` call and everything written is captured.
#[derive(Debug)]
pub struct MockExchange {
    method: Method,
    version: Version,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    scheme: Option<String>,
    local_name: Option<String>,
    local_port: Option<u16>,
    body: VecDeque<Bytes>,
    attributes: HashMap<String, Arc<dyn std::any::Any + Send + Sync>>,
    attribute_lookups: usize,
    status: StatusCode,
    response_headers: HeaderMap,
    committed_headers: Option<HeaderMap>,
    written: BytesMut,
    write_calls: usize,
    fail_writes: Option<io::ErrorKind>,
    fail_reads: Option<io::ErrorKind>,
    finished: bool,
}

impl MockExchange {
    /// `target` is the request target, e.g. `/app/page;jsessionid=A?x=1`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("localhost"));
        Self {
            method,
            version: Version::HTTP_11,
            path,
            query,
            headers,
            scheme: None,
            local_name: Some("localhost".to_string()),
            local_port: Some(8080),
            body: VecDeque::new(),
            attributes: HashMap::new(),
            attribute_lookups: 0,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            committed_headers: None,
            written: BytesMut::new(),
            write_calls: 0,
            fail_writes: None,
            fail_reads: None,
            finished: false,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post_form(target: &str, body: &str) -> Self {
        Self::new(Method::POST, target)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_header("content-length", &body.len().to_string())
            .with_body_chunks([body.to_string()])
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replace the default `Host: localhost`.
    pub fn with_host(mut self, host: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(host) {
            self.headers.insert(http::header::HOST, value);
        }
        self
    }

    pub fn with_body_chunks<I, B>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.body.extend(chunks.into_iter().map(Into::into));
        self
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(scheme.to_string());
        self
    }

    pub fn with_attribute<T: std::any::Any + Send + Sync>(mut self, name: &str, value: T) -> Self {
        self.attributes.insert(name.to_string(), Arc::new(value));
        self
    }

    /// Every write fails with `kind`, as if the peer went away.
    /// Every body read fails with `kind`.
    pub fn fail_reads_with(mut self, kind: io::ErrorKind) -> Self {
        self.fail_reads = Some(kind);
        self
    }

    pub fn fail_writes_with(mut self, kind: io::ErrorKind) -> Self {
        self.fail_writes = Some(kind);
        self
    }

    pub fn into_ref(self) -> Rc<RefCell<MockExchange>> {
        Rc::new(RefCell::new(self))
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    pub fn attribute_lookups(&self) -> usize {
        self.attribute_lookups
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.response_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn response_header_all(&self, name: &str) -> Vec<String> {
        self.response_headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect()
    }

    /// Headers as they were when the response was committed.
    pub fn committed_headers(&self) -> Option<&HeaderMap> {
        self.committed_headers.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Exchange for MockExchange {
    fn method(&self) -> &Method {
        &self.method
    }

    fn version(&self) -> Version {
        self.version
    }

    fn raw_path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn read_body(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        if let Some(kind) = self.fail_reads {
            return Err(io::Error::new(kind, "scripted read failure"));
        }
        match self.body.pop_front() {
            Some(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attribute_lookups += 1;
        self.attributes.get(name).cloned()
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    fn commit(&mut self) -> io::Result<()> {
        if let Some(kind) = self.fail_writes {
            return Err(io::Error::new(kind, "peer closed connection"));
        }
        if self.committed_headers.is_none() {
            self.committed_headers = Some(self.response_headers.clone());
        }
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        self.commit()?;
        self.write_calls += 1;
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed_headers.is_some()
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.committed_headers.is_none() {
            self.committed_headers = Some(self.response_headers.clone());
        }
        self.finished = true;
        Ok(())
    }
}
