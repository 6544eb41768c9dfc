//! Transport contract.
//!
//! The protocol engine that parsed the request line and headers hands each
//! exchange to this layer as an [`Exchange`]. All calls are blocking and run
//! on the thread that owns the exchange.
//!
//! ```text
//!  transport ──read_body──▶ InputChannel ──▶ Request ──▶ RequestFacade ─┐
//!                                                                      ├─▶ Pipeline
//!  transport ◀─write_body── OutputChannel ◀─ Response ◀─ ResponseFacade ┘
//! ```

pub mod mock;

use bytes::BytesMut;
use http::{HeaderMap, Method, StatusCode, Version};
use std::any::Any;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to the exchange, held by the Request and Response bound
/// to it. Thread-bound by construction.
pub type ExchangeRef = Rc<RefCell<dyn Exchange>>;

/// Value stored in request attributes and side-channel lookups.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Remote peer address, as a `std::net::SocketAddr`.
pub const REMOTE_ADDR_ATTR: &str = "exchangenet.remote_addr";
/// Negotiated TLS cipher suite name, as a `String`.
pub const TLS_CIPHER_SUITE_ATTR: &str = "exchangenet.tls.cipher_suite";
/// TLS session id, as a `String`.
pub const TLS_SESSION_ID_ATTR: &str = "exchangenet.tls.session_id";
/// DER-encoded peer certificate chain, as a `Vec<Vec<u8>>`.
pub const TLS_PEER_CERTIFICATES_ATTR: &str = "exchangenet.tls.peer_certificates";

/// Attributes fetched lazily from the transport on first lookup.
pub const SIDE_CHANNEL_ATTRS: [&str; 4] = [
    REMOTE_ADDR_ATTR,
    TLS_CIPHER_SUITE_ATTR,
    TLS_SESSION_ID_ATTR,
    TLS_PEER_CERTIFICATES_ATTR,
];

/// One request/response cycle as seen by the transport.
pub trait Exchange {
    fn method(&self) -> &Method;

    fn version(&self) -> Version;

    /// Request path exactly as received, still percent-encoded.
    fn raw_path(&self) -> &str;

    fn query(&self) -> Option<&str>;

    fn request_headers(&self) -> &HeaderMap;

    /// Scheme when the transport knows it (e.g. after TLS termination).
    fn scheme(&self) -> Option<&str> {
        None
    }

    fn is_secure(&self) -> bool {
        self.scheme() == Some("https")
    }

    /// Local server name when the `Host` header is absent.
    fn local_name(&self) -> Option<&str> {
        None
    }

    fn local_port(&self) -> Option<u16> {
        None
    }

    /// Append available body bytes to `buf`; `Ok(0)` signals end of body.
    fn read_body(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Lazy side-channel lookup (TLS, remote address, ...).
    fn attribute(&mut self, name: &str) -> Option<AttributeValue>;

    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode);

    fn response_headers(&self) -> &HeaderMap;

    fn response_headers_mut(&mut self) -> &mut HeaderMap;

    /// Send status and headers if not yet sent.
    fn commit(&mut self) -> io::Result<()>;

    /// Send body bytes, committing first if needed.
    fn write_body(&mut self, data: &[u8]) -> io::Result<()>;

    fn is_committed(&self) -> bool;

    /// End of exchange: commits if needed and terminates the body framing.
    fn finish(&mut self) -> io::Result<()>;
}
