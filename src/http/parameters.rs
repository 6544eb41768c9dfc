use crate::base::neterror::NetError;
use crate::buffer::Charset;
use crate::uri::decode_component;
use std::collections::HashMap;
use url::form_urlencoded;

/// Request parameters from the query string and form bodies.
///
/// Names keep first-seen order and every name may carry several values.
/// Once locked (first read by a handler) no further values are accepted
/// for the rest of the exchange.
#[derive(Debug, Default)]
pub struct ParameterMap {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
    count: usize,
    limit: Option<usize>,
    parsed: bool,
    locked: bool,
    failure: Option<NetError>,
}

impl ParameterMap {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Add one value. Values past the count limit are dropped.
    pub fn add(&mut self, name: String, value: String) -> Result<(), NetError> {
        if self.locked {
            return Err(NetError::ParametersLocked);
        }
        if self.limit.is_some_and(|limit| self.count >= limit) {
            tracing::warn!(name = %name, "parameter count limit reached, dropping parameter");
            return Ok(());
        }
        self.count += 1;
        match self.values.get_mut(&name) {
            Some(existing) => existing.push(value),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
        Ok(())
    }

    /// Parse `a=1&b=2` pairs.
    ///
    /// UTF-8 data goes through `form_urlencoded`, which keeps a broken
    /// escape as literal text. Other charsets are decoded byte-wise and a
    /// pair with a broken escape is skipped.
    pub fn add_encoded(&mut self, data: &[u8], charset: Charset) -> Result<(), NetError> {
        if charset == Charset::Utf8 {
            for (name, value) in form_urlencoded::parse(data) {
                if !name.is_empty() {
                    self.add(name.into_owned(), value.into_owned())?;
                }
            }
            return Ok(());
        }
        for pair in data.split(|&b| b == b'&') {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &pair[pair.len()..]),
            };
            if name.is_empty() {
                continue;
            }
            let decoded = decode_component(name, true).and_then(|n| Ok((n, decode_component(value, true)?)));
            match decoded {
                Ok((name, value)) => {
                    self.add(charset.decode_to_string(&name), charset.decode_to_string(&value))?;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable parameter");
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name and values in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.names
            .iter()
            .filter_map(|n| self.values.get(n).map(|v| (n.as_str(), v.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub fn set_parsed(&mut self) {
        self.parsed = true;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Record a parse failure; the map is locked and the error is reported
    /// again by [`failure`](Self::failure) until recycle.
    pub fn fail(&mut self, err: NetError) {
        self.parsed = true;
        self.locked = true;
        self.failure = Some(err);
    }

    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn recycle(&mut self) {
        self.names.clear();
        self.values.clear();
        self.count = 0;
        self.parsed = false;
        self.locked = false;
        self.failure = None;
    }
}
