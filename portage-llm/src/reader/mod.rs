//! Response readers
//!
//! A reader decodes one backend's raw response text into a deployment
//! package, applying backend-specific pre-cleaning. Readers are stateless
//! and may be shared across requests.

mod basic;
mod golang;
mod reasoning;

pub use basic::BasicReader;
pub use golang::GoReader;
pub use reasoning::ReasoningReader;

use portage_core::DeploymentPackage;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures decoding a raw LLM response into a package
#[derive(Debug, Error)]
pub enum ResponseParseError {
    #[error("response is empty")]
    Empty,
    #[error("response is not a filename to content map: {0}")]
    InvalidJson(String),
    #[error("response contains no files")]
    NoFiles,
    #[error("{0} not found in response")]
    MissingMain(&'static str),
    #[error("root file is empty")]
    EmptyRootFile,
    #[error("response is missing json")]
    MissingJson,
}

/// Decoder from raw LLM text to a deployment package
pub trait ResponseReader: Send + Sync {
    /// Decodes `raw` into a new package; `original` supplies the fields a
    /// response does not carry (fixtures, env, suffix).
    fn decode(
        &self,
        raw: &str,
        original: &DeploymentPackage,
    ) -> Result<DeploymentPackage, ResponseParseError>;
}

/// Parses the `{filename: file_content}` response shape
pub(crate) fn parse_file_map(raw: &str) -> Result<BTreeMap<String, String>, ResponseParseError> {
    serde_json::from_str(raw).map_err(|err| ResponseParseError::InvalidJson(err.to_string()))
}
