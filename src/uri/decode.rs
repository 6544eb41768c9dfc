use crate::base::neterror::NetError;
use crate::buffer::Charset;

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decode a request path in place.
///
/// Fails on a truncated or non-hex escape, and on an encoded `/` or `\`
/// unless `allow_encoded_slash` is set.
pub fn decode_in_place(buf: &mut Vec<u8>, allow_encoded_slash: bool) -> Result<(), NetError> {
    let Some(first) = buf.iter().position(|&b| b == b'%') else {
        return Ok(());
    };
    let len = buf.len();
    let mut r = first;
    let mut w = first;
    while r < len {
        let b = buf[r];
        if b != b'%' {
            buf[w] = b;
            r += 1;
            w += 1;
            continue;
        }
        if r + 2 >= len {
            return Err(NetError::BadPercentEncoding);
        }
        let (Some(hi), Some(lo)) = (hex_value(buf[r + 1]), hex_value(buf[r + 2])) else {
            return Err(NetError::BadPercentEncoding);
        };
        let decoded = (hi << 4) | lo;
        if (decoded == b'/' || decoded == b'\\') && !allow_encoded_slash {
            return Err(NetError::EncodedSlash);
        }
        buf[w] = decoded;
        r += 3;
        w += 1;
    }
    buf.truncate(w);
    Ok(())
}

/// Decode a query or form component into a fresh buffer.
pub fn decode_component(bytes: &[u8], plus_as_space: bool) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => return Err(NetError::BadPercentEncoding),
                }
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Convert decoded URI bytes to text with `charset`; UTF-8 input that does
/// not validate is read as ISO-8859-1 instead.
pub fn to_text(bytes: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => Charset::Iso8859_1.decode_to_string(bytes),
        },
        other => other.decode_to_string(bytes),
    }
}
