//! Stump definitions: a named rule set plus one or more canned responses.

use crate::rules::MatchRule;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of generated stump identifiers.
const STUMP_ID_LENGTH: usize = 7;

fn default_status_code() -> u16 {
    200
}

/// How a stump with multiple responses picks one per invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SelectionPolicy {
    /// Registration order, cycling back to the first after the last.
    #[default]
    Sequential,
    /// Uniformly at random, independent of prior selections.
    Random,
}

/// One canned response owned by a stump.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub status_description: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Applied as `Content-Type` when the headers don't already carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Body bytes travel as a side-car payload, never inline.
    #[serde(skip)]
    pub body: Vec<u8>,
    /// Reference to the persisted side-car body payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_resource: Option<String>,
    /// Wait this long before writing the response.
    #[serde(default)]
    pub delay_ms: u64,
    /// Close the connection without writing any response bytes.
    #[serde(default)]
    pub drop_connection: bool,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            status_description: String::new(),
            headers: HashMap::new(),
            content_type: None,
            body: Vec::new(),
            body_resource: None,
            delay_ms: 0,
            drop_connection: false,
        }
    }
}

impl ResponseSpec {
    /// Shorthand for a plain-text response, used heavily in tests.
    pub fn with_body(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
            ..Self::default()
        }
    }
}

/// A named rule set plus its canned responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StumpDefinition {
    /// Assigned at creation from the id generator; never reused.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub rules: Vec<MatchRule>,
    #[serde(default)]
    pub responses: Vec<ResponseSpec>,
    #[serde(default)]
    pub response_selection: SelectionPolicy,
    /// Reference to the persisted side-car match-body payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_body_resource: Option<String>,
}

impl StumpDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            category: None,
            rules: Vec::new(),
            responses: Vec::new(),
            response_selection: SelectionPolicy::Sequential,
            match_body_resource: None,
        }
    }

    /// The raw text a body rule matches on, persisted as a side-car
    /// payload so the console can show it verbatim.
    pub fn match_body(&self) -> Option<Vec<u8>> {
        self.rules.iter().find_map(|rule| match rule {
            MatchRule::BodyContent { specifiers } => Some(specifiers.join("\n").into_bytes()),
            _ => None,
        })
    }
}

/// Source of stump identifiers. Injectable so tests stay deterministic.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh fixed-length alphanumeric identifier.
    fn generate(&self) -> String;
}

/// Identifier generator backed by a cryptographically seeded RNG.
pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        let mut rng = self.rng.lock();
        (0..STUMP_ID_LENGTH)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_fixed_length_alphanumeric() {
        let generator = RandomIdGenerator::new();
        for _ in 0..50 {
            let id = generator.generate();
            assert_eq!(id.len(), STUMP_ID_LENGTH);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_seeded_generator_is_deterministic() {
        let a = RandomIdGenerator::with_rng(StdRng::seed_from_u64(7));
        let b = RandomIdGenerator::with_rng(StdRng::seed_from_u64(7));
        assert_eq!(a.generate(), b.generate());
        assert_eq!(a.generate(), b.generate());
    }

    #[test]
    fn test_stump_serde_skips_body_bytes() {
        let mut stump = StumpDefinition::new("example");
        stump.responses.push(ResponseSpec::with_body(200, "payload"));
        let json = serde_json::to_string(&stump).unwrap();
        assert!(!json.contains("payload"));

        let back: StumpDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "example");
        assert!(back.responses[0].body.is_empty());
    }

    #[test]
    fn test_match_body_extracted_from_body_rule() {
        let mut stump = StumpDefinition::new("example");
        assert!(stump.match_body().is_none());
        stump.rules.push(MatchRule::BodyContent {
            specifiers: vec!["alpha".to_string(), "not:beta".to_string()],
        });
        assert_eq!(stump.match_body().unwrap(), b"alpha\nnot:beta");
    }
}
