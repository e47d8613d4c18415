//! Body-content rule evaluation.

use super::{NOT_PREFIX, REGEX_PREFIX};

/// Fraction of bytes above 126 beyond which a body is treated as binary.
const BINARY_THRESHOLD: f64 = 0.05;

/// Classify a body as text. An empty body is never text; a body whose
/// high-byte fraction exceeds the threshold is binary.
pub fn is_textual_body(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    let high = body.iter().filter(|&&b| b > 126).count();
    (high as f64) / (body.len() as f64) <= BINARY_THRESHOLD
}

/// Evaluate all specifiers against the body. Binary bodies never match.
pub fn body_content_matches(body: &[u8], specifiers: &[String]) -> bool {
    if !is_textual_body(body) {
        return false;
    }
    let text = String::from_utf8_lossy(body);
    specifiers.iter().all(|spec| specifier_matches(spec, &text))
}

/// One specifier: plain case-sensitive containment, `regex:<pattern>` for a
/// search anywhere in the body, `not:<spec>` to invert the wrapped result.
fn specifier_matches(spec: &str, text: &str) -> bool {
    if let Some(inner) = spec.strip_prefix(NOT_PREFIX) {
        return !specifier_matches(inner, text);
    }
    if let Some(pattern) = spec.strip_prefix(REGEX_PREFIX) {
        return regex::Regex::new(pattern)
            .map(|re| re.is_match(text))
            .unwrap_or(false);
    }
    text.contains(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"AAAAAABBBBBBpassedCCCCCCDDDDDD";

    fn matches(specs: &[&str]) -> bool {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        body_content_matches(BODY, &specs)
    }

    #[test]
    fn test_all_specifiers_present() {
        assert!(matches(&["passed", "AAA"]));
    }

    #[test]
    fn test_one_specifier_absent_fails() {
        assert!(!matches(&["failed", "AAA"]));
    }

    #[test]
    fn test_containment_is_case_sensitive() {
        assert!(!matches(&["PASSED", "AAA"]));
    }

    #[test]
    fn test_not_inverts_absent_specifier() {
        assert!(matches(&["not:failed"]));
    }

    #[test]
    fn test_not_inverts_present_specifier() {
        assert!(!matches(&["not:passed"]));
    }

    #[test]
    fn test_regex_search() {
        assert!(matches(&["regex:AA.*ssed.*D"]));
    }

    #[test]
    fn test_not_regex() {
        assert!(!matches(&["not:regex:AA.*ssed.*D"]));
    }

    #[test]
    fn test_binary_body_never_matches() {
        let binary = [200u8, 172, 203, 199, 166, 180, 7];
        assert!(!body_content_matches(&binary, &["not:anything".to_string()]));
        assert!(!is_textual_body(&binary));
    }

    #[test]
    fn test_empty_body_is_not_text() {
        assert!(!is_textual_body(b""));
        assert!(!body_content_matches(b"", &[]));
    }

    #[test]
    fn test_mostly_text_with_few_high_bytes_is_text() {
        let mut body = vec![b'a'; 100];
        body.push(0xC3);
        assert!(is_textual_body(&body));
    }

    #[test]
    fn test_invalid_regex_specifier_fails_closed() {
        assert!(!matches(&["regex:["]));
    }
}
