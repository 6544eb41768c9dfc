//! Response body channel.
//!
//! Stages byte or character writes, encodes characters into the byte side
//! and hands full buffers to the transport. A transport write failure is
//! always reported as [`NetError::ClientAbort`] and sticks for the rest of
//! the exchange.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::buffer::{Access, Buffer, BufferMode, CharsetCache, Encoder};
use crate::exchange::ExchangeRef;
use bytes::BytesMut;
use http::header::{HeaderValue, CONTENT_LENGTH};
use std::sync::Arc;

pub struct OutputChannel {
    buffer: Buffer,
    default_size: usize,
    exchange: Option<ExchangeRef>,
    encoder: Option<Encoder>,
    encoding: String,
    default_encoding: String,
    charsets: Arc<CharsetCache>,
    scratch: BytesMut,
    bytes_written: u64,
    suspended: bool,
    closed: bool,
    aborted: Option<NetError>,
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("mode", &self.buffer.mode())
            .field("encoding", &self.encoding)
            .field("bytes_written", &self.bytes_written)
            .field("suspended", &self.suspended)
            .field("closed", &self.closed)
            .field("aborted", &self.aborted)
            .finish()
    }
}

impl OutputChannel {
    pub fn new(size: usize, default_encoding: &str, charsets: Arc<CharsetCache>) -> Self {
        Self {
            buffer: Buffer::new(size),
            default_size: size,
            exchange: None,
            encoder: None,
            encoding: default_encoding.to_string(),
            default_encoding: default_encoding.to_string(),
            charsets,
            scratch: BytesMut::new(),
            bytes_written: 0,
            suspended: false,
            closed: false,
            aborted: None,
        }
    }

    pub fn bind(&mut self, exchange: ExchangeRef) {
        self.exchange = Some(exchange);
    }

    pub fn mode(&self) -> BufferMode {
        self.buffer.mode()
    }

    /// Charset for character writes. Takes effect on the next conversion.
    pub fn set_encoding(&mut self, encoding: &str) {
        if !self.encoding.eq_ignore_ascii_case(encoding) {
            self.encoding = encoding.to_string();
            self.encoder = None;
        }
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Bytes accepted so far, staged or sent.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Bytes (and not yet encoded characters) held back from the transport.
    pub fn pending(&self) -> usize {
        self.buffer.bytes().len() + self.buffer.chars().len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.bytes().limit()
    }

    pub fn set_buffer_size(&mut self, size: usize) -> Result<(), NetError> {
        if self.bytes_written > 0 || !self.buffer.is_empty() {
            return Err(NetError::InvalidBufferSize);
        }
        self.buffer.bytes_mut().set_limit(size.max(1));
        Ok(())
    }

    /// A suspended channel drops every write without error.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The sticky client abort, if one happened.
    pub fn abort_error(&self) -> Option<&NetError> {
        self.aborted.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.exchange
            .as_ref()
            .is_some_and(|exchange| exchange.borrow().is_committed())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), NetError> {
        self.check_writable()?;
        if self.suspended || data.is_empty() {
            return Ok(());
        }
        self.convert_chars()?;
        self.buffer.pin(Access::Bytes).map_err(conflict)?;

        let limit = self.buffer.bytes().limit();
        if data.len() <= self.buffer.bytes().space() {
            self.buffer.append_bytes(data).map_err(conflict)?;
            self.bytes_written += data.len() as u64;
            if self.buffer.bytes().is_full() {
                self.flush_bytes()?;
            }
            return Ok(());
        }

        self.flush_bytes()?;
        self.bytes_written += data.len() as u64;
        if data.len() >= limit {
            self.send(data)
        } else {
            self.buffer.append_bytes(data).map_err(conflict)
        }
    }

    pub fn write_chars(&mut self, text: &str) -> Result<(), NetError> {
        self.check_writable()?;
        if self.suspended || text.is_empty() {
            return Ok(());
        }
        if self.buffer.mode() == BufferMode::Bytes {
            // Staged bytes stay ahead of the characters encoded after them.
            self.buffer.release();
        }

        let limit = self.buffer.bytes().limit();
        let mut rest = text.chars();
        loop {
            let room = limit.saturating_sub(self.buffer.chars().len()).max(1);
            let added = self
                .buffer
                .append_chars(rest.by_ref().take(room))
                .map_err(conflict)?;
            if self.buffer.chars().len() >= limit {
                self.convert_chars()?;
                if self.buffer.bytes().len() >= limit {
                    self.flush_bytes()?;
                }
            }
            if added < room {
                return Ok(());
            }
        }
    }

    /// Send everything staged and commit the response.
    pub fn flush(&mut self) -> Result<(), NetError> {
        self.check_writable()?;
        if self.suspended {
            return Ok(());
        }
        self.convert_chars()?;
        self.flush_bytes()?;
        let exchange = self.exchange.as_ref().ok_or(NetError::StreamClosed)?;
        let result = exchange.borrow_mut().commit().client_abort_context();
        self.record(result)
    }

    /// Completion: sets `Content-Length` from the staged body when the
    /// response is still uncommitted and no length was given, then writes
    /// out what is left.
    pub fn close(&mut self) -> Result<(), NetError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(err) = &self.aborted {
            return Err(err.clone());
        }
        self.convert_chars()?;

        let exchange = self.exchange.clone().ok_or(NetError::StreamClosed)?;
        {
            let mut exchange = exchange.borrow_mut();
            if !exchange.is_committed() && !exchange.response_headers().contains_key(CONTENT_LENGTH) {
                exchange
                    .response_headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from(self.bytes_written));
            }
        }
        self.flush_bytes()
    }

    /// Drop staged content. Fails once the response is committed.
    pub fn reset(&mut self) -> Result<(), NetError> {
        if self.is_committed() {
            return Err(NetError::ResponseCommitted);
        }
        self.buffer.discard();
        self.bytes_written = 0;
        Ok(())
    }

    pub fn recycle(&mut self) {
        self.buffer.recycle();
        if self.buffer.bytes().limit() != self.default_size {
            self.buffer.bytes_mut().set_limit(self.default_size);
        }
        self.exchange = None;
        self.encoder = None;
        self.encoding.clone_from(&self.default_encoding);
        self.scratch.clear();
        self.bytes_written = 0;
        self.suspended = false;
        self.closed = false;
        self.aborted = None;
    }

    fn check_writable(&self) -> Result<(), NetError> {
        if let Some(err) = &self.aborted {
            return Err(err.clone());
        }
        if self.closed {
            return Err(NetError::StreamClosed);
        }
        Ok(())
    }

    /// Encode pending characters onto the byte side and release the mode.
    fn convert_chars(&mut self) -> Result<(), NetError> {
        if self.buffer.chars().is_empty() {
            if self.buffer.mode() == BufferMode::Chars {
                self.buffer.release();
            }
            return Ok(());
        }
        let encoder = *self
            .encoder
            .get_or_insert_with(|| resolve_encoder(&self.charsets, &self.encoding));
        self.scratch.clear();
        encoder.encode(self.buffer.chars().unread(), &mut self.scratch);
        self.buffer.discard_chars();
        self.bytes_written += self.scratch.len() as u64;
        self.buffer.append_bytes(&self.scratch).map_err(conflict)?;
        self.buffer.release();
        Ok(())
    }

    fn flush_bytes(&mut self) -> Result<(), NetError> {
        if self.buffer.bytes().is_empty() {
            return Ok(());
        }
        let exchange = self.exchange.as_ref().ok_or(NetError::StreamClosed)?;
        let result = exchange
            .borrow_mut()
            .write_body(self.buffer.bytes().as_slice())
            .client_abort_context();
        self.buffer.discard_bytes();
        self.record(result)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), NetError> {
        let exchange = self.exchange.as_ref().ok_or(NetError::StreamClosed)?;
        let result = exchange.borrow_mut().write_body(data).client_abort_context();
        self.record(result)
    }

    fn record(&mut self, result: Result<(), NetError>) -> Result<(), NetError> {
        if let Err(err) = &result {
            tracing::debug!(error = %err, "client aborted during response write");
            self.aborted = Some(err.clone());
        }
        result
    }
}

/// Error for a write that conflicts with the pinned `current` mode.
fn conflict(current: BufferMode) -> NetError {
    match current {
        BufferMode::Chars => NetError::WriterObtained,
        _ => NetError::OutputStreamObtained,
    }
}

fn resolve_encoder(charsets: &CharsetCache, encoding: &str) -> Encoder {
    match charsets.resolve(encoding) {
        Ok(charset) => charset.encoder(),
        Err(e) => {
            tracing::warn!(encoding = %encoding, error = %e, "no encoder for response, copying characters as-is");
            Encoder::Identity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::Exchange;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn channel(size: usize) -> (OutputChannel, Rc<RefCell<MockExchange>>) {
        let exchange = MockExchange::get("/").into_ref();
        let mut channel = OutputChannel::new(size, "UTF-8", Arc::new(CharsetCache::new()));
        channel.bind(exchange.clone());
        (channel, exchange)
    }

    #[test]
    fn test_small_body_gets_content_length() {
        let (mut out, exchange) = channel(16);
        out.write_bytes(b"hello").unwrap();
        assert_eq!(exchange.borrow().write_calls(), 0);

        out.close().unwrap();
        let exchange = exchange.borrow();
        assert_eq!(exchange.written(), b"hello");
        assert_eq!(exchange.response_header("content-length").as_deref(), Some("5"));
    }

    #[test]
    fn test_overflow_flushes_and_commits() {
        let (mut out, exchange) = channel(4);
        out.write_bytes(b"abc").unwrap();
        out.write_bytes(b"defgh").unwrap();
        assert!(exchange.borrow().write_calls() >= 1);
        assert!(exchange.borrow().is_committed());

        out.close().unwrap();
        assert_eq!(exchange.borrow().written(), b"abcdefgh");
        assert_eq!(exchange.borrow().response_header("content-length"), None);
    }

    #[test]
    fn test_chars_encoded_with_selected_charset() {
        let (mut out, exchange) = channel(16);
        out.set_encoding("ISO-8859-1");
        out.write_chars("caf\u{E9}").unwrap();
        out.close().unwrap();
        assert_eq!(exchange.borrow().written(), b"caf\xE9");
    }

    #[test]
    fn test_mixed_modes_keep_order() {
        let (mut out, exchange) = channel(64);
        out.write_chars("one ").unwrap();
        out.write_bytes(b"two ").unwrap();
        out.write_chars("three").unwrap();
        out.close().unwrap();
        assert_eq!(exchange.borrow().written_text(), "one two three");
    }

    #[test]
    fn test_writes_pin_the_buffer() {
        let (mut out, _exchange) = channel(64);
        out.write_chars("a").unwrap();
        assert_eq!(out.mode(), BufferMode::Chars);
        out.write_bytes(b"b").unwrap();
        assert_eq!(out.mode(), BufferMode::Bytes);
        assert_eq!(out.pending(), 2);
        out.reset().unwrap();
        assert_eq!(out.mode(), BufferMode::Unset);
        assert_eq!(out.pending(), 0);
    }

    #[test]
    fn test_unknown_encoding_copies_identity() {
        let (mut out, exchange) = channel(16);
        out.set_encoding("x-nothing");
        out.write_chars("ok").unwrap();
        out.close().unwrap();
        assert_eq!(exchange.borrow().written(), b"ok");
    }

    #[test]
    fn test_suspended_drops_writes() {
        let (mut out, exchange) = channel(16);
        out.set_suspended(true);
        out.write_bytes(b"ignored").unwrap();
        out.close().unwrap();
        assert!(exchange.borrow().written().is_empty());
        assert_eq!(exchange.borrow().response_header("content-length").as_deref(), Some("0"));
    }

    #[test]
    fn test_write_failure_is_client_abort_and_sticky() {
        let exchange = MockExchange::get("/")
            .fail_writes_with(std::io::ErrorKind::ConnectionReset)
            .into_ref();
        let mut out = OutputChannel::new(2, "UTF-8", Arc::new(CharsetCache::new()));
        out.bind(exchange);

        let err = out.write_bytes(b"abcd").unwrap_err();
        assert!(err.is_client_abort());
        assert!(out.write_bytes(b"x").unwrap_err().is_client_abort());
        assert!(out.close().unwrap_err().is_client_abort());
    }

    #[test]
    fn test_reset_after_commit_fails() {
        let (mut out, _exchange) = channel(16);
        out.write_bytes(b"abc").unwrap();
        out.reset().unwrap();
        assert_eq!(out.bytes_written(), 0);

        out.flush().unwrap();
        assert_eq!(out.reset(), Err(NetError::ResponseCommitted));
    }

    #[test]
    fn test_buffer_size_fixed_after_write() {
        let (mut out, _exchange) = channel(16);
        out.set_buffer_size(32).unwrap();
        assert_eq!(out.buffer_size(), 32);
        out.write_bytes(b"a").unwrap();
        assert_eq!(out.set_buffer_size(64), Err(NetError::InvalidBufferSize));

        out.recycle();
        assert_eq!(out.buffer_size(), 16);
    }
}
