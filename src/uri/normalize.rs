use crate::base::neterror::NetError;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Normalize a decoded request path in place.
///
/// `*` passes through. Otherwise backslashes become slashes, runs of `/`
/// collapse, `/./` segments vanish and each `/../` pops the segment before
/// it. A path that does not start with `/`, contains NUL or climbs above
/// the root is rejected.
///
/// Works by shifting bytes within `uri`; the only possible growth is the one
/// trailing `/` appended to a path ending in `/.` or `/..`.
pub fn normalize(uri: &mut Vec<u8>) -> Result<(), NetError> {
    if uri.as_slice() == b"*" {
        return Ok(());
    }

    for b in uri.iter_mut() {
        match *b {
            b'\\' => *b = b'/',
            0 => return Err(NetError::NullByteInUri),
            _ => {}
        }
    }

    if uri.first() != Some(&b'/') {
        return Err(NetError::UriNotAbsolute);
    }

    let mut w = 1;
    for r in 1..uri.len() {
        if uri[r] == b'/' && uri[w - 1] == b'/' {
            continue;
        }
        uri[w] = uri[r];
        w += 1;
    }
    uri.truncate(w);

    if uri.ends_with(b"/.") || uri.ends_with(b"/..") {
        uri.push(b'/');
    }

    while let Some(i) = find(uri, b"/./") {
        uri.copy_within(i + 2.., i);
        uri.truncate(uri.len() - 2);
    }

    while let Some(i) = find(uri, b"/../") {
        if i == 0 {
            return Err(NetError::UriTraversal);
        }
        let prev = uri[..i].iter().rposition(|&b| b == b'/').unwrap_or(0);
        uri.copy_within(i + 3.., prev);
        uri.truncate(uri.len() - (i + 3 - prev));
    }

    Ok(())
}
