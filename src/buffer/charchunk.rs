use crate::base::neterror::NetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mark {
    pos: usize,
    limit: usize,
}

/// Decoded character staging area with mark/reset support.
#[derive(Debug)]
pub struct CharChunk {
    buf: Vec<char>,
    start: usize,
    default_size: usize,
    mark: Option<Mark>,
}

impl CharChunk {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(size),
            start: 0,
            default_size: size,
            mark: None,
        }
    }

    /// Unread characters.
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn unread(&self) -> &[char] {
        &self.buf[self.start..]
    }

    /// Storage to decode into. Consumed characters are dropped first unless
    /// a live mark still needs them.
    pub fn fill_target(&mut self) -> &mut Vec<char> {
        self.invalidate_stale_mark();
        let keep_from = self.mark.map_or(self.start, |m| m.pos);
        if keep_from > 0 && keep_from == self.buf.len() {
            self.buf.clear();
            self.start = 0;
            self.mark = self.mark.map(|m| Mark { pos: 0, ..m });
        }
        &mut self.buf
    }

    pub fn append(&mut self, chars: &[char]) {
        self.fill_target().extend_from_slice(chars);
    }

    /// Move up to `max` characters into `dest`.
    pub fn read(&mut self, dest: &mut String, max: usize) -> usize {
        let n = max.min(self.len());
        dest.extend(&self.buf[self.start..self.start + n]);
        self.start += n;
        n
    }

    /// Move characters up to and including the next `'\n'` into `dest`,
    /// without the terminator (or a preceding `'\r'`). Returns whether a
    /// terminator was found; otherwise everything unread was moved.
    pub fn read_line(&mut self, dest: &mut String) -> bool {
        let unread = &self.buf[self.start..];
        match unread.iter().position(|&c| c == '\n') {
            Some(idx) => {
                let line = &unread[..idx];
                let line = line.strip_suffix(&['\r']).unwrap_or(line);
                dest.extend(line);
                self.start += idx + 1;
                true
            }
            None => {
                dest.extend(unread);
                self.start = self.buf.len();
                false
            }
        }
    }

    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.start += n;
        n
    }

    /// Remember the current position; up to `read_ahead` characters may be
    /// read before the mark is invalidated.
    ///
    /// Once more than half of the storage is consumed, the unread tail is
    /// moved to the front in place; otherwise storage grows as needed.
    pub fn mark(&mut self, read_ahead: usize) {
        if self.is_empty() {
            self.buf.clear();
            self.start = 0;
        } else if self.start > self.buf.len() / 2 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.mark = Some(Mark {
            pos: self.start,
            limit: read_ahead,
        });
    }

    pub fn reset(&mut self) -> Result<(), NetError> {
        self.invalidate_stale_mark();
        match self.mark {
            Some(mark) => {
                self.start = mark.pos;
                Ok(())
            }
            None => {
                self.clear();
                Err(NetError::InvalidMark)
            }
        }
    }

    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.mark = None;
    }

    /// Clear, shrinking storage that grew past its default size while marked.
    pub fn recycle(&mut self) {
        if self.buf.capacity() > self.default_size {
            self.buf = Vec::with_capacity(self.default_size);
        }
        self.clear();
    }

    fn invalidate_stale_mark(&mut self) {
        if let Some(mark) = self.mark {
            if self.start - mark.pos > mark.limit {
                self.mark = None;
            }
        }
    }
}
