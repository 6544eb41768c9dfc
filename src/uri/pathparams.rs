use crate::uri::decode_component;

/// Remove every `;name=value` path parameter from a raw (still
/// percent-encoded) path.
///
/// A parameter run starts at `;` and ends at the next `/`; several
/// parameters in one segment are separated by `;`. Returns the removed
/// parameters in order of appearance, with names and values decoded.
pub fn strip_path_parameters(path: &mut Vec<u8>) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if !path.contains(&b';') {
        return params;
    }

    let len = path.len();
    let mut r = 0;
    let mut w = 0;
    while r < len {
        if path[r] != b';' {
            path[w] = path[r];
            w += 1;
            r += 1;
            continue;
        }
        let end = path[r..]
            .iter()
            .position(|&b| b == b'/')
            .map_or(len, |p| r + p);
        for pair in path[r + 1..end].split(|&b| b == b';') {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &pair[pair.len()..]),
            };
            params.push((param_text(name), param_text(value)));
        }
        r = end;
    }
    path.truncate(w);
    params
}

fn param_text(bytes: &[u8]) -> String {
    match decode_component(bytes, false) {
        Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
