//! Request path processing.
//!
//! Raw path → session marker strip (see [`crate::session`]) →
//! [`strip_path_parameters`] → [`decode_in_place`] → [`normalize`] → text
//! for mapping. Parameters are removed before normalization so a segment
//! such as `..;x=1` is resolved like any other `..`.

pub mod decode;
pub mod normalize;
pub mod pathparams;

pub use decode::{decode_component, decode_in_place, to_text};
pub use normalize::normalize;
pub use pathparams::strip_path_parameters;

use crate::base::neterror::NetError;

/// Decode and normalize a request path whose parameters are already
/// stripped.
pub fn decode_normalize(buf: &mut Vec<u8>, allow_encoded_slash: bool) -> Result<(), NetError> {
    decode_in_place(buf, allow_encoded_slash)?;
    normalize(buf)
}

/// Decode and normalize a raw request path into a fresh buffer.
pub fn decode_path(raw: &str, allow_encoded_slash: bool) -> Result<Vec<u8>, NetError> {
    let mut buf = Vec::with_capacity(raw.len() + 1);
    buf.extend_from_slice(raw.as_bytes());
    decode_normalize(&mut buf, allow_encoded_slash)?;
    Ok(buf)
}
