//! Structured recovery of code from free-form model output.
//!
//! Models are asked for a JSON list of `{version, target code}` objects but
//! frequently answer with fenced code blocks or with the list buried in
//! prose. An `Extractor` runs an ordered chain of strategies; the first one
//! that recognizes its shape wins. When none does, the result is an explicit
//! empty payload. Extraction never fails.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::language::LangCluster;
use crate::problem::ExtractedCode;

/// Start of the expected JSON list.
pub const LIST_START: &str = r#"[{"version"#;
/// End of the expected JSON list. Located by plain substring search, so a
/// literal `}]` inside a code string ends the payload early.
pub const LIST_END: &str = "}]";

/// JSON list text recovered from one response. Empty when nothing was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn from_code(code: &ExtractedCode) -> Self {
        // Serializing a two-string struct cannot fail.
        Self(serde_json::to_string(std::slice::from_ref(code)).unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload inside a `json` fence, the form downstream harnesses parse.
    pub fn wrapped(&self) -> String {
        format!("```json\n{}\n```", self.0)
    }

    /// Parse the payload into code records, tolerating trailing commas and comments.
    pub fn parse(&self) -> Vec<ExtractedCode> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut de = serde_json_lenient::Deserializer::from_str(&self.0);
        de.set_ignore_trailing_commas(true);
        de.set_allow_comments(true);
        match Vec::<ExtractedCode>::deserialize(&mut de).and_then(|v| de.end().map(|_| v)) {
            Ok(codes) => codes,
            Err(e) => {
                debug!("payload is not a valid code list: {e}");
                Vec::new()
            }
        }
    }

    pub fn first(&self) -> Option<ExtractedCode> {
        self.parse().into_iter().next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    FencedCode,
    EmbeddedJson,
}

/// Outcome of running the strategy chain on one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Shape that matched, `None` for the fallback.
    pub shape: Option<Shape>,
    pub payload: Payload,
}

pub trait ExtractStrategy: Send + Sync {
    fn shape(&self) -> Shape;

    /// `None` means the shape was not recognized and the next strategy runs.
    fn try_extract(&self, raw: &str) -> Option<Payload>;
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Language-tagged fenced blocks holding source directly. All blocks are
/// joined with a blank line and labelled with the cluster's canonical version.
pub struct FencedCode {
    pattern: Regex,
    version: String,
}

impl FencedCode {
    pub fn new(tags: &[&str], version: impl Into<String>) -> Self {
        let alternatives = tags
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?s)```(?i:{alternatives})[ \t]*\r?\n(.*?)```"))
            .expect("escaped fence tags form a valid pattern");
        Self {
            pattern,
            version: version.into(),
        }
    }

    pub fn for_cluster(cluster: LangCluster) -> Self {
        Self::new(cluster.fence_tags(), cluster.canonical_version())
    }
}

impl ExtractStrategy for FencedCode {
    fn shape(&self) -> Shape {
        Shape::FencedCode
    }

    fn try_extract(&self, raw: &str) -> Option<Payload> {
        let blocks: Vec<&str> = self
            .pattern
            .captures_iter(raw)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .collect();
        if blocks.is_empty() {
            return None;
        }
        let code = ExtractedCode {
            version: self.version.clone(),
            target_code: blocks.join("\n\n"),
        };
        Some(Payload::from_code(&code))
    }
}

/// A JSON list starting with `[{"version` somewhere after leading prose.
pub struct EmbeddedJson;

impl ExtractStrategy for EmbeddedJson {
    fn shape(&self) -> Shape {
        Shape::EmbeddedJson
    }

    fn try_extract(&self, raw: &str) -> Option<Payload> {
        let start = raw.find(LIST_START)?;
        match raw[start..].find(LIST_END) {
            Some(end) => Some(Payload::new(&raw[start..start + end + LIST_END.len()])),
            None => {
                warn!("JSON list opened at byte {start} is never closed");
                Some(Payload::empty())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct Extractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractStrategy>>) -> Self {
        Self { strategies }
    }

    /// Fenced blocks for `cluster` first, then an embedded JSON list.
    pub fn for_cluster(cluster: LangCluster) -> Self {
        Self::new(vec![
            Box::new(FencedCode::for_cluster(cluster)),
            Box::new(EmbeddedJson),
        ])
    }

    pub fn extract(&self, raw: &str) -> Extraction {
        for strategy in &self.strategies {
            if let Some(payload) = strategy.try_extract(raw) {
                return Extraction {
                    shape: Some(strategy.shape()),
                    payload,
                };
            }
        }
        warn!("no code found in model output ({} bytes)", raw.len());
        Extraction {
            shape: None,
            payload: Payload::empty(),
        }
    }

    /// First structured code record in `raw`, if any survives parsing.
    pub fn extract_code(&self, raw: &str) -> Option<ExtractedCode> {
        self.extract(raw).payload.first()
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::for_cluster(LangCluster::Python)
    }
}

/// Extract with the default (python) chain.
pub fn extract(raw: &str) -> Payload {
    Extractor::default().extract(raw).payload
}

pub fn extract_code(raw: &str) -> Option<ExtractedCode> {
    Extractor::default().extract_code(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_python_block() {
        let raw = "Here you go:\n```python\nprint(1)\n```\nDone.";
        let code = extract_code(raw).unwrap();
        assert_eq!(code.version, "python3");
        assert_eq!(code.target_code, "print(1)");
    }

    #[test]
    fn test_multiple_blocks_concatenated_in_order() {
        let raw = "```python\nimport sys\n```\ntext\n```Python \nprint(sys.argv)\n```";
        let extraction = Extractor::default().extract(raw);
        assert_eq!(extraction.shape, Some(Shape::FencedCode));
        let code = extraction.payload.first().unwrap();
        assert_eq!(code.target_code, "import sys\n\nprint(sys.argv)");
    }

    #[test]
    fn test_other_language_fence_ignored_by_python_chain() {
        let raw = "```cpp\nint main(){}\n```";
        assert!(extract(raw).is_empty());

        let code = Extractor::for_cluster(LangCluster::Cpp)
            .extract_code(raw)
            .unwrap();
        assert_eq!(code.version, "GNU C++17");
        assert_eq!(code.target_code, "int main(){}");
    }

    #[test]
    fn test_embedded_json_substring() {
        let raw = r#"some preamble [{"version": "GNU C++17", "target code": "int main(){}"}] trailing"#;
        let extraction = Extractor::default().extract(raw);
        assert_eq!(extraction.shape, Some(Shape::EmbeddedJson));
        assert_eq!(
            extraction.payload.as_str(),
            r#"[{"version": "GNU C++17", "target code": "int main(){}"}]"#
        );
        let code = extraction.payload.first().unwrap();
        assert_eq!(code.version, "GNU C++17");
        assert_eq!(code.target_code, "int main(){}");
    }

    #[test]
    fn test_embedded_json_at_start_of_text() {
        let raw = r#"[{"version": "python3", "target code": "print(2)"}]"#;
        assert_eq!(extract(raw).as_str(), raw);
    }

    #[test]
    fn test_embedded_json_unclosed_is_empty() {
        let raw = r#"answer: [{"version": "python3", "target code": "print(2)""#;
        let extraction = Extractor::default().extract(raw);
        assert_eq!(extraction.shape, Some(Shape::EmbeddedJson));
        assert!(extraction.payload.is_empty());
    }

    #[test]
    fn test_malformed_input_is_empty() {
        let extraction = Extractor::default().extract("I cannot solve this problem.");
        assert_eq!(extraction.shape, None);
        assert!(extraction.payload.is_empty());
        assert_eq!(extraction.payload.wrapped(), "```json\n\n```");
        assert!(extraction.payload.first().is_none());
    }

    #[test]
    fn test_reextraction_is_idempotent() {
        let raw = "```python\nn = int(input())\nprint(n * 2)\n```";
        let once = extract(raw);
        let twice = extract(&once.wrapped());
        assert_eq!(once, twice);
        assert_eq!(once.first(), twice.first());

        let embedded = extract(r#"x [{"version": "Go", "target code": "package main"}] y"#);
        assert_eq!(extract(&embedded.wrapped()), embedded);
    }

    #[test]
    fn test_literal_close_sequence_in_code_truncates() {
        let raw = r#"[{"version": "python3", "target code": "a = [{}]"}]"#;
        let payload = extract(raw);
        assert_eq!(payload.as_str(), r#"[{"version": "python3", "target code": "a = [{}]"#);
        assert!(payload.first().is_none());
    }

    #[test]
    fn test_lenient_parse_trailing_comma() {
        let payload = Payload::new("[{\"version\": \"python3\", \"target code\": \"x = 1\"},]");
        assert_eq!(payload.parse().len(), 1);
    }
}
