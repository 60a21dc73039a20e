//! Portage Core
//!
//! Core types for the portage function conversion service.
//!
//! This crate contains:
//! - Domain types: DeploymentPackage, TestFixture, ConversionRequest
//! - Metrics: per-conversion timing and token accounting
//! - Errors: the distinguished conversion error kinds
//! - Zip I/O: reading uploaded packages and writing result artifacts

pub mod error;
pub mod metrics;
pub mod package;
pub mod request;
pub mod zipio;

pub use error::ConversionError;
pub use metrics::RunMetrics;
pub use package::{DeploymentPackage, TestFixture};
pub use request::ConversionRequest;
