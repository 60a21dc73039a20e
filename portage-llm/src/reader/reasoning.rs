//! Reasoning-model response reader
//!
//! Reasoning backends prefix their answer with a chain-of-thought segment
//! ending in `</think>` and may wrap the JSON payload in prose. This
//! reader cuts the prelude, extracts the outermost `{ … }` span, strips
//! newlines, and hands the result to an inner reader.

use super::{ResponseParseError, ResponseReader};
use portage_core::DeploymentPackage;

const THINK_MARKER: &str = "</think>";

/// Wraps another reader with chain-of-thought pre-cleaning
pub struct ReasoningReader {
    inner: Box<dyn ResponseReader>,
}

impl ReasoningReader {
    pub fn new(inner: Box<dyn ResponseReader>) -> Self {
        Self { inner }
    }
}

impl ResponseReader for ReasoningReader {
    fn decode(
        &self,
        raw: &str,
        original: &DeploymentPackage,
    ) -> Result<DeploymentPackage, ResponseParseError> {
        if raw.is_empty() {
            return Err(ResponseParseError::Empty);
        }

        let content = match raw.split_once(THINK_MARKER) {
            Some((_, rest)) => rest,
            None => raw,
        };

        let start = content.find('{').ok_or(ResponseParseError::MissingJson)?;
        let end = content.rfind('}').ok_or(ResponseParseError::MissingJson)?;
        if end < start {
            return Err(ResponseParseError::MissingJson);
        }

        let json = content[start..=end].replace('\n', "");
        self.inner.decode(&json, original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::GoReader;

    fn reader() -> ReasoningReader {
        ReasoningReader::new(Box::new(GoReader))
    }

    #[test]
    fn test_strips_prelude_and_trailing_text() {
        let raw = "<think>let me reason about this</think> here you go {\"main.go\":\"package main\\nfunc Handle() {}\"} hope that helps";
        let package = reader().decode(raw, &DeploymentPackage::new("py")).unwrap();
        assert!(package.root_file.contains("func Handle"));
        assert_eq!(package.suffix, "go");
    }

    #[test]
    fn test_removes_literal_newlines_inside_json() {
        let raw = "</think>\n{\n\"main.go\": \"package main\"\n}\n";
        let package = reader().decode(raw, &DeploymentPackage::new("py")).unwrap();
        assert_eq!(package.root_file, "package main");
    }

    #[test]
    fn test_missing_json_is_an_error() {
        let raw = "<think>hm</think> no payload here";
        assert!(matches!(
            reader().decode(raw, &DeploymentPackage::new("py")),
            Err(ResponseParseError::MissingJson)
        ));
    }

    #[test]
    fn test_plain_json_passes_through() {
        let raw = "{\"main.go\":\"package main\"}";
        let package = reader().decode(raw, &DeploymentPackage::new("py")).unwrap();
        assert_eq!(package.root_file, "package main");
    }
}
