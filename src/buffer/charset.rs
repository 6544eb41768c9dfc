//! Character sets and byte/char converters.
//!
//! Resolving a charset name is done once per name for the whole process
//! through [`CharsetCache`]; the resulting [`Decoder`]s carry per-exchange
//! state (split multi-byte sequences) and are owned by a single channel.

use crate::base::neterror::NetError;
use bytes::{BufMut, BytesMut};
use dashmap::DashMap;

/// Substituted for malformed input.
pub const REPLACEMENT: char = '\u{FFFD}';

/// Substituted for characters the target charset cannot represent.
const UNMAPPABLE: u8 = b'?';

/// Supported character sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    Iso8859_1,
    UsAscii,
    Utf16Be,
    Utf16Le,
}

impl Charset {
    /// Resolve a charset by name or alias (case-insensitive).
    pub fn for_name(name: &str) -> Option<Charset> {
        let name = name.trim().trim_matches('"').to_ascii_lowercase();
        let charset = match name.as_str() {
            "utf-8" | "utf8" => Charset::Utf8,
            "iso-8859-1" | "iso8859-1" | "iso8859_1" | "iso_8859-1" | "latin1" | "latin-1"
            | "l1" | "cp819" => Charset::Iso8859_1,
            "us-ascii" | "ascii" | "us" | "iso646-us" => Charset::UsAscii,
            "utf-16be" | "utf16be" => Charset::Utf16Be,
            "utf-16le" | "utf16le" => Charset::Utf16Le,
            _ => return None,
        };
        Some(charset)
    }

    /// Canonical name, as sent in `Content-Type`.
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
            Charset::Utf16Be => "UTF-16BE",
            Charset::Utf16Le => "UTF-16LE",
        }
    }

    pub fn decoder(self) -> Decoder {
        Decoder::new(self)
    }

    pub fn encoder(self) -> Encoder {
        Encoder::Charset(self)
    }

    /// One-shot decode of a complete byte sequence.
    pub fn decode_to_string(self, bytes: &[u8]) -> String {
        let mut out = Vec::with_capacity(bytes.len());
        self.decoder().decode(bytes, &mut out, true);
        out.into_iter().collect()
    }
}

/// Process-wide charset resolution cache.
///
/// Entries are inserted once per (lower-cased) name and never change, so
/// concurrent exchanges share lookups without re-parsing aliases. Only names
/// that resolve are stored; names come from client headers and unknown ones
/// must not grow the map.
#[derive(Debug, Default)]
pub struct CharsetCache {
    entries: DashMap<String, Charset>,
}

impl CharsetCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Resolve `name`, constructing the cache entry on first use.
    pub fn resolve(&self, name: &str) -> Result<Charset, NetError> {
        let key = name.trim().to_ascii_lowercase();
        if let Some(hit) = self.entries.get(&key) {
            return Ok(*hit);
        }
        let Some(charset) = Charset::for_name(&key) else {
            tracing::debug!(charset = %name, "unsupported charset");
            return Err(NetError::unsupported_charset(name));
        };
        Ok(*self.entries.entry(key).or_insert(charset))
    }

    /// Number of distinct supported names seen so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Incremental byte-to-char converter.
#[derive(Debug, Clone)]
pub struct Decoder {
    charset: Charset,
    leftover: Vec<u8>,
}

impl Decoder {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            leftover: Vec::with_capacity(4),
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Whether an incomplete sequence is held back from the last call.
    pub fn has_leftover(&self) -> bool {
        !self.leftover.is_empty()
    }

    /// Decode all of `input` into `out`.
    ///
    /// A trailing incomplete sequence is kept for the next call unless `eof`
    /// is set, in which case it becomes a replacement character.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<char>, eof: bool) {
        if self.leftover.is_empty() {
            let consumed = decode_with(self.charset, input, out, eof);
            self.leftover.extend_from_slice(&input[consumed..]);
        } else {
            let mut joined = std::mem::take(&mut self.leftover);
            joined.extend_from_slice(input);
            let consumed = decode_with(self.charset, &joined, out, eof);
            joined.drain(..consumed);
            self.leftover = joined;
        }
    }

    pub fn reset(&mut self) {
        self.leftover.clear();
    }
}

/// Returns the number of bytes consumed; the rest is an incomplete tail.
fn decode_with(charset: Charset, bytes: &[u8], out: &mut Vec<char>, eof: bool) -> usize {
    match charset {
        Charset::Utf8 => decode_utf8(bytes, out, eof),
        Charset::Iso8859_1 => {
            out.extend(bytes.iter().map(|&b| b as char));
            bytes.len()
        }
        Charset::UsAscii => {
            out.extend(
                bytes
                    .iter()
                    .map(|&b| if b < 0x80 { b as char } else { REPLACEMENT }),
            );
            bytes.len()
        }
        Charset::Utf16Be => decode_utf16(bytes, out, eof, u16::from_be_bytes),
        Charset::Utf16Le => decode_utf16(bytes, out, eof, u16::from_le_bytes),
    }
}

fn decode_utf8(bytes: &[u8], out: &mut Vec<char>, eof: bool) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.extend(s.chars());
                return bytes.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&rest[..valid]) {
                    out.extend(s.chars());
                }
                match e.error_len() {
                    Some(len) => {
                        out.push(REPLACEMENT);
                        rest = &rest[valid + len..];
                    }
                    None if eof => {
                        out.push(REPLACEMENT);
                        return bytes.len();
                    }
                    None => return bytes.len() - (rest.len() - valid),
                }
            }
        }
    }
}

fn decode_utf16(
    bytes: &[u8],
    out: &mut Vec<char>,
    eof: bool,
    unit: fn([u8; 2]) -> u16,
) -> usize {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    let mut consumed = units.len() * 2;

    // A high surrogate at the end may be completed by the next refill.
    if !eof && matches!(units.last(), Some(0xD800..=0xDBFF)) {
        units.pop();
        consumed -= 2;
    }
    out.extend(char::decode_utf16(units).map(|r| r.unwrap_or(REPLACEMENT)));

    if eof && consumed < bytes.len() {
        out.push(REPLACEMENT);
        return bytes.len();
    }
    consumed
}

/// Char-to-byte converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Charset(Charset),
    /// Fallback used when no charset could be resolved: the low byte of
    /// each character is copied as-is.
    Identity,
}

impl Encoder {
    pub fn charset(&self) -> Option<Charset> {
        match self {
            Encoder::Charset(c) => Some(*c),
            Encoder::Identity => None,
        }
    }

    pub fn encode(&self, chars: &[char], out: &mut BytesMut) {
        match self {
            Encoder::Charset(Charset::Utf8) => {
                let mut tmp = [0u8; 4];
                for c in chars {
                    out.put_slice(c.encode_utf8(&mut tmp).as_bytes());
                }
            }
            Encoder::Charset(Charset::Iso8859_1) => {
                out.extend(chars.iter().map(|&c| narrow(c, 0xFF)));
            }
            Encoder::Charset(Charset::UsAscii) => {
                out.extend(chars.iter().map(|&c| narrow(c, 0x7F)));
            }
            Encoder::Charset(Charset::Utf16Be) => {
                let mut tmp = [0u16; 2];
                for c in chars {
                    for u in c.encode_utf16(&mut tmp) {
                        out.put_u16(*u);
                    }
                }
            }
            Encoder::Charset(Charset::Utf16Le) => {
                let mut tmp = [0u16; 2];
                for c in chars {
                    for u in c.encode_utf16(&mut tmp) {
                        out.put_u16_le(*u);
                    }
                }
            }
            Encoder::Identity => {
                out.extend(chars.iter().map(|&c| (c as u32 & 0xFF) as u8));
            }
        }
    }
}

fn narrow(c: char, max: u32) -> u8 {
    let code = c as u32;
    if code <= max {
        code as u8
    } else {
        UNMAPPABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(charset: Charset, parts: &[&[u8]]) -> String {
        let mut decoder = charset.decoder();
        let mut out = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            decoder.decode(part, &mut out, i == parts.len() - 1);
        }
        out.into_iter().collect()
    }

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(Charset::for_name("utf8"), Some(Charset::Utf8));
        assert_eq!(Charset::for_name(" Latin1 "), Some(Charset::Iso8859_1));
        assert_eq!(Charset::for_name("\"US-ASCII\""), Some(Charset::UsAscii));
        assert_eq!(Charset::for_name("klingon"), None);
    }

    #[test]
    fn test_utf8_split_sequence_is_carried() {
        // "é" is C3 A9
        let text = decode_all(Charset::Utf8, &[b"caf\xC3", b"\xA9!"]);
        assert_eq!(text, "café!");
    }

    #[test]
    fn test_utf8_malformed_becomes_replacement() {
        let text = decode_all(Charset::Utf8, &[b"a\xFFb"]);
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_truncated_at_eof() {
        let text = decode_all(Charset::Utf8, &[b"ab\xE2\x82"]);
        assert_eq!(text, "ab\u{FFFD}");
    }

    #[test]
    fn test_utf16_surrogate_pair_across_refills() {
        // U+1F600 in UTF-16BE: D8 3D DE 00
        let text = decode_all(Charset::Utf16Be, &[&[0xD8, 0x3D], &[0xDE, 0x00]]);
        assert_eq!(text, "\u{1F600}");
    }

    #[test]
    fn test_latin1_roundtrip_bytes() {
        let text = Charset::Iso8859_1.decode_to_string(&[0x41, 0xE9, 0xFF]);
        assert_eq!(text, "A\u{E9}\u{FF}");

        let mut out = BytesMut::new();
        Charset::Iso8859_1.encoder().encode(&['A', '\u{E9}', '\u{263A}'], &mut out);
        assert_eq!(&out[..], &[0x41, 0xE9, b'?']);
    }

    #[test]
    fn test_identity_encoder_copies_low_byte() {
        let mut out = BytesMut::new();
        Encoder::Identity.encode(&['a', '\u{141}'], &mut out);
        assert_eq!(&out[..], &[b'a', 0x41]);
    }

    #[test]
    fn test_cache_constructs_once_per_name() {
        let cache = CharsetCache::new();
        assert_eq!(cache.resolve("UTF-8").unwrap(), Charset::Utf8);
        assert_eq!(cache.resolve("utf-8").unwrap(), Charset::Utf8);
        assert_eq!(cache.len(), 1);

        assert!(matches!(
            cache.resolve("x-unknown"),
            Err(NetError::UnsupportedCharset { .. })
        ));
        assert!(cache.resolve("x-unknown").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_names_are_not_cached() {
        let cache = CharsetCache::new();
        for i in 0..100 {
            assert!(cache.resolve(&format!("x-junk-{i}")).is_err());
        }
        assert!(cache.is_empty());
        cache.resolve("Latin1").unwrap();
        assert_eq!(cache.len(), 1);
    }
}
