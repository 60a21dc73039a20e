//! Deployment package domain types
//!
//! A deployment package is the in-memory bundle of one candidate program:
//! the root source file, auxiliary build files, the build command sequence,
//! the test fixtures it must pass, and its environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One candidate program, either the uploaded source or a converted result.
///
/// Maps are ordered so iteration (and "first fixture") is deterministic.
/// `Clone` performs the deep copy used for snapshotting: maps and vectors
/// are duplicated, string bodies are copied with them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentPackage {
    /// Root source file content (written as `main.<suffix>`)
    pub root_file: String,
    /// Auxiliary build files: relative filename -> content
    pub build_files: BTreeMap<String, String>,
    /// Ordered build command sequence; each entry is a whitespace-tokenised
    /// command line
    pub build_cmd: Vec<String>,
    /// Test fixtures: fixture name -> JSON text
    pub test_files: BTreeMap<String, String>,
    /// Environment overrides, one `KEY=VALUE` per entry
    pub env: Vec<String>,
    /// Source language suffix, e.g. `py` or `go`
    pub suffix: String,
}

impl DeploymentPackage {
    /// Creates an empty package with the given language suffix
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            ..Self::default()
        }
    }

    /// The filename the root file is materialised under
    pub fn root_file_name(&self) -> String {
        format!("main.{}", self.suffix)
    }

    /// The command that executes the built program for this suffix
    pub fn run_cmd(&self) -> Vec<String> {
        match self.suffix.as_str() {
            "go" => vec!["go".into(), "run".into(), ".".into()],
            "py" => vec!["python3".into(), "main.py".into()],
            _ => vec!["./fn".into()],
        }
    }

    /// Parses every fixture, yielding `(name, result)` in stable order
    pub fn fixtures(&self) -> impl Iterator<Item = (&str, Result<TestFixture, serde_json::Error>)> {
        self.test_files
            .iter()
            .map(|(name, body)| (name.as_str(), serde_json::from_str(body)))
    }

    /// The first fixture in stable order, if any parses
    pub fn first_fixture(&self) -> Option<TestFixture> {
        self.fixtures().find_map(|(_, fixture)| fixture.ok())
    }
}

fn default_deterministic() -> bool {
    true
}

/// One test case: stdin text, expected stdout, and per-test environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFixture {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    /// Extra `KEY=VALUE` entries layered over the process environment
    #[serde(default)]
    pub env: Vec<String>,
    /// External dependencies to mock for the test; parsed but not acted on
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// When false the validator applies its loosened threshold
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,
}

impl TestFixture {
    /// Splits an env entry into `(key, value)`; `None` when malformed
    pub fn split_env(entry: &str) -> Option<(&str, &str)> {
        entry.split_once('=')
    }
}
