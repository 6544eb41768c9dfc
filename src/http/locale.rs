/// Parse `Accept-Language` values into language tags, best first.
///
/// Entries with `q=0`, the `*` wildcard and malformed q-values are dropped.
/// Ties keep header order.
pub fn parse_accept_language<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = Vec::new();
    for value in values {
        for entry in value.split(',') {
            let mut fields = entry.split(';');
            let tag = fields.next().unwrap_or("").trim();
            if tag.is_empty() || tag == "*" {
                continue;
            }
            let mut quality = 1.0f32;
            for param in fields {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    quality = q.trim().parse().unwrap_or(-1.0);
                }
            }
            if quality <= 0.0 || quality > 1.0 {
                continue;
            }
            weighted.push((tag.to_string(), quality));
        }
    }
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

/// Primary language subtag, lower-cased.
pub fn language(tag: &str) -> String {
    tag.split(['-', '_']).next().unwrap_or(tag).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_order() {
        let tags = parse_accept_language(["da, en-GB;q=0.8, en;q=0.7"]);
        assert_eq!(tags, vec!["da", "en-GB", "en"]);

        let tags = parse_accept_language(["fr;q=0.5, de", "es;q=0.9"]);
        assert_eq!(tags, vec!["de", "es", "fr"]);
    }

    #[test]
    fn test_skips_zero_and_wildcard() {
        let tags = parse_accept_language(["*, en;q=0, fr;q=abc, it"]);
        assert_eq!(tags, vec!["it"]);
    }

    #[test]
    fn test_language() {
        assert_eq!(language("en-US"), "en");
        assert_eq!(language("PT_br"), "pt");
    }
}
