//! Request body channel.
//!
//! Pulls bytes from the transport only when the staging buffer runs dry and
//! serves them either as raw bytes or, through a lazily-resolved decoder, as
//! characters. One mode per exchange.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::buffer::{Access, Buffer, BufferMode, Charset, CharsetCache, Decoder};
use crate::exchange::ExchangeRef;
use std::collections::HashMap;
use std::sync::Arc;

pub struct InputChannel {
    buffer: Buffer,
    exchange: Option<ExchangeRef>,
    encoding: String,
    default_encoding: String,
    decoder: Option<Decoder>,
    /// Decoders kept from earlier exchanges on this channel, by charset.
    decoders: HashMap<Charset, Decoder>,
    charsets: Arc<CharsetCache>,
    eof: bool,
    closed: bool,
    bytes_read: u64,
}

impl std::fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputChannel")
            .field("mode", &self.buffer.mode())
            .field("encoding", &self.encoding)
            .field("bound", &self.exchange.is_some())
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl InputChannel {
    pub fn new(size: usize, default_encoding: &str, charsets: Arc<CharsetCache>) -> Self {
        Self {
            buffer: Buffer::new(size),
            exchange: None,
            encoding: default_encoding.to_string(),
            default_encoding: default_encoding.to_string(),
            decoder: None,
            decoders: HashMap::new(),
            charsets,
            eof: false,
            closed: false,
            bytes_read: 0,
        }
    }

    pub fn bind(&mut self, exchange: ExchangeRef) {
        self.exchange = Some(exchange);
    }

    pub fn mode(&self) -> BufferMode {
        self.buffer.mode()
    }

    /// Charset for character reads. Ignored once a decoder is active.
    pub fn set_encoding(&mut self, encoding: &str) {
        if self.decoder.is_none() {
            self.encoding = encoding.to_string();
        }
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Total bytes pulled from the transport.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read bytes; `None` at end of body.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> Result<Option<usize>, NetError> {
        self.pin(Access::Bytes)?;
        if dest.is_empty() {
            return Ok(Some(0));
        }
        loop {
            if let Some(n) = self.buffer.read_bytes(dest).map_err(conflict)? {
                return Ok(Some(n));
            }
            if self.fill()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Discard up to `n` bytes, refilling as often as needed.
    pub fn skip_bytes(&mut self, n: u64) -> Result<u64, NetError> {
        self.pin(Access::Bytes)?;
        let mut remaining = n;
        while remaining > 0 {
            if self.buffer.bytes().is_empty() && self.fill()? == 0 {
                break;
            }
            let step = usize::try_from(remaining).unwrap_or(usize::MAX);
            remaining -= self.buffer.skip_bytes(step).map_err(conflict)? as u64;
        }
        Ok(n - remaining)
    }

    /// Read characters; `None` at end of body.
    pub fn read_chars(&mut self, dest: &mut String, max: usize) -> Result<Option<usize>, NetError> {
        self.pin(Access::Chars)?;
        if max == 0 {
            return Ok(Some(0));
        }
        loop {
            if let Some(n) = self.buffer.read_chars(dest, max).map_err(conflict)? {
                return Ok(Some(n));
            }
            if !self.fill_chars()? {
                return Ok(None);
            }
        }
    }

    /// Read one line into `dest`; `false` when the body was already at end.
    pub fn read_line(&mut self, dest: &mut String) -> Result<bool, NetError> {
        self.pin(Access::Chars)?;
        let mut read_any = false;
        loop {
            match self.buffer.read_line(dest).map_err(conflict)? {
                Some(true) => return Ok(true),
                Some(false) => read_any = true,
                None => {
                    if !self.fill_chars()? {
                        return Ok(read_any);
                    }
                }
            }
        }
    }

    pub fn skip_chars(&mut self, n: u64) -> Result<u64, NetError> {
        self.pin(Access::Chars)?;
        let mut remaining = n;
        while remaining > 0 {
            if self.buffer.chars().is_empty() && !self.fill_chars()? {
                break;
            }
            let step = usize::try_from(remaining).unwrap_or(usize::MAX);
            remaining -= self.buffer.skip_chars(step).map_err(conflict)? as u64;
        }
        Ok(n - remaining)
    }

    pub fn mark(&mut self, read_ahead: usize) -> Result<(), NetError> {
        self.check_open()?;
        self.buffer.mark_chars(read_ahead).map_err(conflict)
    }

    pub fn reset(&mut self) -> Result<(), NetError> {
        self.check_open()?;
        self.buffer.reset_chars()
    }

    /// Whether a read would be served without waiting on the transport.
    pub fn ready(&self) -> bool {
        !self.closed && !self.buffer.is_empty()
    }

    /// Staged units for the pinned mode.
    pub fn available(&self) -> usize {
        match self.buffer.mode() {
            BufferMode::Chars => self.buffer.chars().len(),
            _ => self.buffer.bytes().len(),
        }
    }

    /// Read the raw body for form parsing, independent of the stream mode.
    /// Fails once more than `limit` bytes arrive.
    pub fn read_form_body(&mut self, limit: Option<usize>) -> Result<Vec<u8>, NetError> {
        let mut body = Vec::new();
        loop {
            if self.buffer.bytes().is_empty() && self.fill()? == 0 {
                return Ok(body);
            }
            self.buffer.drain_bytes(&mut body);
            if let Some(limit) = limit {
                if body.len() > limit {
                    return Err(NetError::PostTooLarge { limit });
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Clear positions, shrink a re-grown char buffer and park the decoder
    /// for reuse by the next exchange on this channel.
    pub fn recycle(&mut self) {
        self.buffer.recycle();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.reset();
            self.decoders.insert(decoder.charset(), decoder);
        }
        self.exchange = None;
        self.encoding.clone_from(&self.default_encoding);
        self.eof = false;
        self.closed = false;
        self.bytes_read = 0;
    }

    fn check_open(&self) -> Result<(), NetError> {
        if self.closed {
            return Err(NetError::StreamClosed);
        }
        Ok(())
    }

    fn pin(&mut self, access: Access) -> Result<(), NetError> {
        self.check_open()?;
        self.buffer.pin(access).map_err(conflict)
    }

    fn fill(&mut self) -> Result<usize, NetError> {
        if self.eof {
            return Ok(0);
        }
        let exchange = self.exchange.as_ref().ok_or(NetError::StreamClosed)?;
        let n = exchange
            .borrow_mut()
            .read_body(self.buffer.bytes_mut().buf_mut())
            .transport_context("read_body")?;
        if n == 0 {
            self.eof = true;
        }
        self.bytes_read += n as u64;
        Ok(n)
    }

    /// Refill the char side; `false` at end of body with nothing decoded.
    fn fill_chars(&mut self) -> Result<bool, NetError> {
        loop {
            let eof = self.buffer.bytes().is_empty() && self.fill()? == 0;
            let decoder = self.decoder.get_or_insert_with(|| {
                acquire_decoder(&self.charsets, &mut self.decoders, &self.encoding)
            });
            let (bytes, chars) = self.buffer.split_mut();
            decoder.decode(bytes.as_slice(), chars.fill_target(), eof);
            bytes.clear();
            if !chars.is_empty() {
                return Ok(true);
            }
            if eof {
                return Ok(false);
            }
        }
    }
}

/// Error for an access that conflicts with the pinned `current` mode.
fn conflict(current: BufferMode) -> NetError {
    match current {
        BufferMode::Chars => NetError::ReaderObtained,
        _ => NetError::InputStreamObtained,
    }
}

fn acquire_decoder(
    charsets: &CharsetCache,
    parked: &mut HashMap<Charset, Decoder>,
    encoding: &str,
) -> Decoder {
    let charset = match charsets.resolve(encoding) {
        Ok(charset) => charset,
        Err(e) => {
            tracing::debug!(encoding = %encoding, error = %e, "falling back to ISO-8859-1 for request body");
            Charset::Iso8859_1
        }
    };
    parked
        .remove(&charset)
        .unwrap_or_else(|| charset.decoder())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;

    fn channel_for(chunks: Vec<&'static [u8]>, size: usize) -> InputChannel {
        let exchange = MockExchange::new(http::Method::POST, "/")
            .with_body_chunks(chunks)
            .into_ref();
        let mut channel = InputChannel::new(size, "UTF-8", Arc::new(CharsetCache::new()));
        channel.bind(exchange);
        channel
    }

    #[test]
    fn test_byte_reads_refill_on_demand() {
        let mut channel = channel_for(vec![b"abc", b"de"], 8);
        let mut dest = [0u8; 2];
        assert_eq!(channel.read_bytes(&mut dest).unwrap(), Some(2));
        assert_eq!(channel.read_bytes(&mut dest).unwrap(), Some(1));
        assert_eq!(channel.read_bytes(&mut dest).unwrap(), Some(2));
        assert_eq!(&dest, b"de");
        assert_eq!(channel.read_bytes(&mut dest).unwrap(), None);
        assert_eq!(channel.bytes_read(), 5);
    }

    #[test]
    fn test_skip_drains_across_refills() {
        let mut channel = channel_for(vec![b"ab", b"cd", b"ef"], 8);
        assert_eq!(channel.skip_bytes(5).unwrap(), 5);
        let mut dest = [0u8; 4];
        assert_eq!(channel.read_bytes(&mut dest).unwrap(), Some(1));
        assert_eq!(dest[0], b'f');
        assert_eq!(channel.skip_bytes(10).unwrap(), 0);
    }

    #[test]
    fn test_char_reads_decode_split_sequences() {
        let mut channel = channel_for(vec![b"h\xC3", b"\xA9llo\nbye"], 8);
        let mut line = String::new();
        assert!(channel.read_line(&mut line).unwrap());
        assert_eq!(line, "héllo");

        let mut rest = String::new();
        assert!(channel.read_line(&mut rest).unwrap());
        assert_eq!(rest, "bye");
        assert!(!channel.read_line(&mut String::new()).unwrap());
    }

    #[test]
    fn test_mode_is_exclusive() {
        let mut channel = channel_for(vec![b"abc"], 8);
        let mut dest = [0u8; 1];
        channel.read_bytes(&mut dest).unwrap();
        assert_eq!(
            channel.read_chars(&mut String::new(), 1),
            Err(NetError::InputStreamObtained)
        );
    }

    #[test]
    fn test_char_ops_rejected_after_byte_read() {
        let mut channel = channel_for(vec![b"ab\ncd"], 8);
        let mut dest = [0u8; 1];
        channel.read_bytes(&mut dest).unwrap();
        assert_eq!(channel.mark(4), Err(NetError::InputStreamObtained));
        assert_eq!(channel.read_line(&mut String::new()), Err(NetError::InputStreamObtained));
        assert_eq!(channel.skip_chars(1), Err(NetError::InputStreamObtained));
        assert_eq!(channel.skip_bytes(10).unwrap(), 4);
    }

    #[test]
    fn test_read_failure_is_transport_error() {
        let exchange = MockExchange::get("/")
            .fail_reads_with(std::io::ErrorKind::TimedOut)
            .into_ref();
        let mut channel = InputChannel::new(8, "UTF-8", Arc::new(CharsetCache::new()));
        channel.bind(exchange);
        let err = channel.read_bytes(&mut [0u8; 4]).unwrap_err();
        assert!(matches!(err, NetError::Transport { ref message } if message.starts_with("read_body")));
    }

    #[test]
    fn test_unknown_encoding_falls_back_to_latin1() {
        let mut channel = channel_for(vec![b"\xE9t\xE9"], 8);
        channel.set_encoding("x-made-up");
        let mut out = String::new();
        channel.read_chars(&mut out, 10).unwrap();
        assert_eq!(out, "\u{E9}t\u{E9}");
    }

    #[test]
    fn test_reset_without_mark_is_error() {
        let mut channel = channel_for(vec![b"abc"], 8);
        let mut out = String::new();
        channel.read_chars(&mut out, 1).unwrap();
        assert_eq!(channel.reset(), Err(NetError::InvalidMark));
    }

    #[test]
    fn test_recycle_parks_decoder_and_unpins() {
        let mut channel = channel_for(vec![b"abc"], 8);
        channel.read_chars(&mut String::new(), 1).unwrap();
        channel.recycle();
        assert_eq!(channel.mode(), BufferMode::Unset);
        assert_eq!(channel.decoders.len(), 1);
        assert!(channel.decoder.is_none());
    }
}
