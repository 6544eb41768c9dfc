use bytes::{Buf, BytesMut};

/// Growable byte staging area with a soft limit.
///
/// Consumed bytes are released from the front; the backing allocation is
/// kept across exchanges and only replaced on recycle when it grew far past
/// the configured limit.
#[derive(Debug)]
pub struct ByteChunk {
    buf: BytesMut,
    limit: usize,
}

impl ByteChunk {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        if self.buf.capacity() < limit {
            self.buf.reserve(limit - self.buf.len());
        }
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Room left before the limit is reached.
    pub fn space(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    pub fn is_full(&self) -> bool {
        self.space() == 0
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Copy up to `dest.len()` bytes out and consume them.
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.buf.len());
        dest[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        n
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Fill target for the transport.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn recycle(&mut self) {
        if self.buf.capacity() > self.limit * 4 {
            self.buf = BytesMut::with_capacity(self.limit);
        } else {
            self.buf.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let mut chunk = ByteChunk::with_limit(8);
        chunk.append(b"hello");
        assert_eq!(chunk.space(), 3);

        let mut dest = [0u8; 3];
        assert_eq!(chunk.read(&mut dest), 3);
        assert_eq!(&dest, b"hel");
        assert_eq!(chunk.as_slice(), b"lo");
    }

    #[test]
    fn test_skip_is_bounded() {
        let mut chunk = ByteChunk::with_limit(8);
        chunk.append(b"abc");
        assert_eq!(chunk.skip(10), 3);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_full_at_limit() {
        let mut chunk = ByteChunk::with_limit(4);
        chunk.append(b"abcd");
        assert!(chunk.is_full());
        chunk.recycle();
        assert!(chunk.is_empty());
        assert_eq!(chunk.limit(), 4);
    }
}
