//! Basic response reader
//!
//! The raw text is JSON mapping filenames to file contents. The first key
//! (in sorted order) beginning with `main` becomes the root file; the rest
//! become build files.

use super::{parse_file_map, ResponseParseError, ResponseReader};
use portage_core::DeploymentPackage;
use tracing::debug;

/// Language-agnostic reader for `{filename: content}` responses
#[derive(Debug, Default)]
pub struct BasicReader;

impl ResponseReader for BasicReader {
    fn decode(
        &self,
        raw: &str,
        original: &DeploymentPackage,
    ) -> Result<DeploymentPackage, ResponseParseError> {
        if raw.is_empty() {
            return Err(ResponseParseError::Empty);
        }

        let mut files = parse_file_map(raw)?;
        debug!("found {} files", files.len());
        if files.is_empty() {
            return Err(ResponseParseError::NoFiles);
        }

        // BTreeMap keys are sorted, so the tie-break between several
        // main* entries is stable.
        let root_name = files
            .keys()
            .find(|name| name.starts_with("main"))
            .cloned()
            .ok_or(ResponseParseError::MissingMain("main"))?;
        let root_file = files.remove(&root_name).unwrap_or_default();

        let mut package = DeploymentPackage::new(original.suffix.clone());
        package.root_file = root_file;
        package.build_files = files;
        package.test_files = original.test_files.clone();
        package.env = original.env.clone();
        Ok(package)
    }
}
