//! Dual-mode staging buffers and charset conversion.
//!
//! A [`Buffer`] holds a byte side and a character side. The first read or
//! write pins it to one of them (see [`BufferMode`]); the pin is released at
//! a flush boundary or on recycle. Buffers are touched by exactly one
//! exchange at a time and carry no locking.

pub mod bytechunk;
pub mod charchunk;
pub mod charset;
pub mod mode;

pub use bytechunk::ByteChunk;
pub use charchunk::CharChunk;
pub use charset::{Charset, CharsetCache, Decoder, Encoder};
pub use mode::{Access, BufferMode};

use crate::base::neterror::NetError;

/// Default staging size for both sides, in bytes and characters.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug)]
pub struct Buffer {
    mode: BufferMode,
    bytes: ByteChunk,
    chars: CharChunk,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self {
            mode: BufferMode::Unset,
            bytes: ByteChunk::with_limit(size),
            chars: CharChunk::with_capacity(size),
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Pin the buffer for `access`; `Err` carries the conflicting mode.
    pub fn pin(&mut self, access: Access) -> Result<(), BufferMode> {
        self.mode = self.mode.pin(access)?;
        Ok(())
    }

    /// Flush boundary: the next operation may pick either side again.
    pub fn release(&mut self) {
        self.mode.release();
    }

    pub fn bytes(&self) -> &ByteChunk {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut ByteChunk {
        &mut self.bytes
    }

    pub fn chars(&self) -> &CharChunk {
        &self.chars
    }

    pub fn chars_mut(&mut self) -> &mut CharChunk {
        &mut self.chars
    }

    /// Both sides at once, for conversion between them. Does not pin.
    pub fn split_mut(&mut self) -> (&mut ByteChunk, &mut CharChunk) {
        (&mut self.bytes, &mut self.chars)
    }

    pub fn append_bytes(&mut self, data: &[u8]) -> Result<(), BufferMode> {
        self.pin(Access::Bytes)?;
        self.bytes.append(data);
        Ok(())
    }

    /// Append characters; returns how many were taken from `data`.
    pub fn append_chars<I>(&mut self, data: I) -> Result<usize, BufferMode>
    where
        I: IntoIterator<Item = char>,
    {
        self.pin(Access::Chars)?;
        let target = self.chars.fill_target();
        let before = target.len();
        target.extend(data);
        Ok(target.len() - before)
    }

    /// Read staged bytes; `None` when nothing is staged.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> Result<Option<usize>, BufferMode> {
        self.pin(Access::Bytes)?;
        if self.bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.bytes.read(dest)))
    }

    /// Read staged characters; `None` when nothing is staged.
    pub fn read_chars(&mut self, dest: &mut String, max: usize) -> Result<Option<usize>, BufferMode> {
        self.pin(Access::Chars)?;
        if self.chars.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.chars.read(dest, max)))
    }

    /// Move staged characters up to the next line end into `dest`.
    /// `None` when nothing is staged, otherwise whether the line ended.
    pub fn read_line(&mut self, dest: &mut String) -> Result<Option<bool>, BufferMode> {
        self.pin(Access::Chars)?;
        if self.chars.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.chars.read_line(dest)))
    }

    pub fn skip_bytes(&mut self, n: usize) -> Result<usize, BufferMode> {
        self.pin(Access::Bytes)?;
        Ok(self.bytes.skip(n))
    }

    pub fn skip_chars(&mut self, n: usize) -> Result<usize, BufferMode> {
        self.pin(Access::Chars)?;
        Ok(self.chars.skip(n))
    }

    /// Mark the character side; `reset_chars` returns to it while fewer than
    /// `read_ahead` characters have been read since.
    pub fn mark_chars(&mut self, read_ahead: usize) -> Result<(), BufferMode> {
        self.pin(Access::Chars)?;
        self.chars.mark(read_ahead);
        Ok(())
    }

    pub fn reset_chars(&mut self) -> Result<(), NetError> {
        if self.mode != BufferMode::Chars {
            return Err(NetError::InvalidMark);
        }
        self.chars.reset()
    }

    /// Move every staged byte into `out`, whatever the mode.
    pub fn drain_bytes(&mut self, out: &mut Vec<u8>) -> usize {
        let n = self.bytes.len();
        out.extend_from_slice(self.bytes.as_slice());
        self.bytes.clear();
        n
    }

    /// Drop staged bytes and release the pin; staged characters stay.
    pub fn discard_bytes(&mut self) {
        self.bytes.clear();
        self.mode.release();
    }

    /// Drop staged characters and release the pin; staged bytes stay.
    pub fn discard_chars(&mut self) {
        self.chars.clear();
        self.mode.release();
    }

    /// Drop everything staged on both sides and release the pin.
    pub fn discard(&mut self) {
        self.bytes.clear();
        self.chars.clear();
        self.mode.release();
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.chars.is_empty()
    }

    pub fn recycle(&mut self) {
        self.mode.release();
        self.bytes.recycle();
        self.chars.recycle();
    }
}
