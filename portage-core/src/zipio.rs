//! Zip packaging
//!
//! Reads an uploaded function zip into a [`DeploymentPackage`] and writes a
//! converted package back out as a result artifact.
//!
//! Input layout: the root file is the first entry with a recognised source
//! suffix, fixtures live under `test/` as JSON files, environment overrides
//! come from any `.env` entry. Everything else is ignored.

use crate::package::DeploymentPackage;
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Source suffixes an upload may carry
const RECOGNISED_SUFFIXES: &[&str] = &["py", "go"];

/// Errors while reading or writing a package zip
#[derive(Debug, Error)]
pub enum PackageIoError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("entry {0} is not valid UTF-8")]
    Encoding(String),
}

/// Reads a deployment package from zip bytes.
///
/// The first entry ending in a recognised suffix becomes the root file and
/// sets the package suffix. A missing root is left empty; a downstream
/// precondition check rejects it before any subprocess is spawned.
pub fn read_package(data: &[u8]) -> Result<DeploymentPackage, PackageIoError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut package = DeploymentPackage::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        let suffix = RECOGNISED_SUFFIXES
            .iter()
            .find(|suffix| name.ends_with(&format!(".{suffix}")));

        if let Some(suffix) = suffix {
            if package.root_file.is_empty() {
                package.root_file = read_entry(&mut entry, &name)?;
                package.suffix = suffix.to_string();
                debug!("root file {} ({} bytes)", name, package.root_file.len());
            }
        } else if name.starts_with("test/") {
            let body = read_entry(&mut entry, &name)?;
            package.test_files.insert(name, body);
        } else if name.ends_with(".env") {
            let body = read_entry(&mut entry, &name)?;
            package.env.extend(parse_env(&body));
        }
    }

    if package.root_file.is_empty() {
        warn!("uploaded package contains no recognised root file");
    }

    Ok(package)
}

/// Writes a deployment package as a zip artifact.
///
/// Layout: `main.<suffix>`, every fixture at its original path, every build
/// file at its declared path, and a generated `build.sh` with one build
/// command per line.
pub fn write_package(package: &DeploymentPackage) -> Result<Vec<u8>, PackageIoError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let write_file = |writer: &mut ZipWriter<Cursor<Vec<u8>>>,
                          name: &str,
                          content: &str|
     -> Result<(), PackageIoError> {
        writer.start_file(name, options)?;
        writer.write_all(content.as_bytes())?;
        debug!("written {} [{}] bytes", name, content.len());
        Ok(())
    };

    write_file(&mut writer, &package.root_file_name(), &package.root_file)?;
    for (name, body) in &package.test_files {
        write_file(&mut writer, name, body)?;
    }
    for (name, body) in &package.build_files {
        write_file(&mut writer, name, body)?;
    }

    if !package.build_cmd.is_empty() {
        let mut script = String::from("#! /bin/sh\n\n");
        for line in &package.build_cmd {
            script.push_str(line);
            script.push('\n');
        }
        write_file(&mut writer, "build.sh", &script)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn read_entry(entry: &mut impl Read, name: &str) -> Result<String, PackageIoError> {
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw)?;
    String::from_utf8(raw).map_err(|_| PackageIoError::Encoding(name.to_string()))
}

/// Extracts `KEY=VALUE` lines from a `.env` body, skipping blanks and
/// `#` comments
fn parse_env(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && line.contains('='))
        .map(str::to_string)
        .collect()
}
