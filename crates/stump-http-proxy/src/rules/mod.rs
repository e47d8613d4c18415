//! Rule matching for stumps.
//!
//! A stump carries an ordered set of rules; a request is intercepted only
//! when every rule matches (implicit AND). Rules serialize with the stump
//! definition so they survive the persistence boundary.

mod body;

pub use body::{body_content_matches, is_textual_body};

use crate::context::ProxyRequest;
use serde::{Deserialize, Serialize};

/// Prefix selecting regex semantics for url patterns and body specifiers.
pub(crate) const REGEX_PREFIX: &str = "regex:";
/// Prefix inverting the wrapped body specifier.
pub(crate) const NOT_PREFIX: &str = "not:";

/// A single predicate a request must satisfy for a stump to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MatchRule {
    /// Case-insensitive equality against the request method.
    HttpMethod { method: String },
    /// Exact path equality, or a regex search when written `regex:<pattern>`.
    Url { pattern: String },
    /// Case-insensitive header-name lookup with exact value comparison.
    Header { name: String, value: String },
    /// Textual-body containment/regex specifiers, AND-combined.
    BodyContent { specifiers: Vec<String> },
}

impl MatchRule {
    pub fn matches(&self, request: &ProxyRequest) -> bool {
        match self {
            MatchRule::HttpMethod { method } => request.method.eq_ignore_ascii_case(method),
            MatchRule::Url { pattern } => url_matches(pattern, &request.path),
            MatchRule::Header { name, value } => {
                request.header(name).map(|v| v == value).unwrap_or(false)
            }
            MatchRule::BodyContent { specifiers } => {
                body_content_matches(&request.decoded_body(), specifiers)
            }
        }
    }
}

fn url_matches(pattern: &str, path: &str) -> bool {
    if let Some(expr) = pattern.strip_prefix(REGEX_PREFIX) {
        return regex::Regex::new(expr)
            .map(|re| re.is_match(path))
            .unwrap_or(false);
    }
    pattern == path
}

/// A stump matches only when every configured rule matches. A stump with no
/// rules matches everything.
pub fn all_rules_match(rules: &[MatchRule], request: &ProxyRequest) -> bool {
    rules.iter().all(|rule| rule.matches(request))
}
