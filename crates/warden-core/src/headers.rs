//! Header blob parsing.
//!
//! The proxy sends headers as one blob of `Key: Value` lines separated by
//! `\n` or `\r\n`. Parsing knows nothing about HTTP semantics: no folding and
//! no merging of repeated names, every pair is handed to the callback as is.

use std::borrow::Cow;

use crate::error::{CoreError, CoreResult};

/// Parse a header blob, invoking `callback` once per `Key: Value` pair.
///
/// Keys and values are trimmed, blank lines are skipped, and invalid UTF-8 is
/// replaced lossily. A line without a `:` separator aborts the parse with
/// [`CoreError::MalformedHeader`]; pairs delivered before that line are not
/// rolled back.
///
/// Returns the number of pairs delivered.
///
/// # Example
///
/// ```
/// use warden_core::parse_headers;
///
/// let mut pairs = Vec::new();
/// parse_headers(b"Host: localhost\r\nX-Foo: bar", |k, v| {
///     pairs.push((k.to_string(), v.to_string()));
/// })
/// .unwrap();
///
/// assert_eq!(pairs[0], ("Host".to_string(), "localhost".to_string()));
/// assert_eq!(pairs[1], ("X-Foo".to_string(), "bar".to_string()));
/// ```
pub fn parse_headers<F>(blob: &[u8], mut callback: F) -> CoreResult<usize>
where
    F: FnMut(&str, &str),
{
    let mut count = 0;

    for raw in blob.split(|b| *b == b'\n') {
        let line: Cow<'_, str> = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| CoreError::malformed_header(line))?;

        callback(key.trim(), value.trim());
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(blob: &[u8]) -> CoreResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        parse_headers(blob, |k, v| pairs.push((k.to_string(), v.to_string())))?;
        Ok(pairs)
    }

    #[test]
    fn test_crlf_pairs_in_order() {
        let pairs = collect(b"Host: localhost\r\nX-Foo: bar").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("Host".to_string(), "localhost".to_string()),
                ("X-Foo".to_string(), "bar".to_string()),
            ]
        );
    }

    #[test]
    fn test_lf_and_blank_lines() {
        let pairs = collect(b"\nA: 1\n\n  B :  2  \r\n\r\n").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_value_keeps_inner_colons() {
        let pairs = collect(b"Referer: http://example.com:8080/x").unwrap();
        assert_eq!(pairs[0].1, "http://example.com:8080/x");
    }

    #[test]
    fn test_empty_value_allowed() {
        let pairs = collect(b"X-Empty:").unwrap();
        assert_eq!(pairs, vec![("X-Empty".to_string(), String::new())]);
    }

    #[test]
    fn test_malformed_line_aborts_after_partial_delivery() {
        let mut seen = Vec::new();
        let result = parse_headers(b"Host: a\r\nbroken line\r\nX: y", |k, _| {
            seen.push(k.to_string());
        });

        assert!(matches!(result, Err(CoreError::MalformedHeader { ref line }) if line == "broken line"));
        assert_eq!(seen, vec!["Host".to_string()]);
    }

    #[test]
    fn test_empty_blob() {
        assert_eq!(parse_headers(b"", |_, _| {}).unwrap(), 0);
    }
}
