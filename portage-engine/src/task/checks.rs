//! Structural tasks: the no-op placeholder and the compile precondition

use super::TaskAction;
use crate::runner::PipelineRunner;
use async_trait::async_trait;
use portage_core::{ConversionError, ConversionRequest};

/// Does nothing; used as a structural graph node
#[derive(Debug, Default)]
pub struct Noop;

#[async_trait]
impl TaskAction for Noop {
    async fn apply(
        &self,
        _runner: &PipelineRunner,
        _request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// Rejects a working package that cannot possibly build.
///
/// Runs as a `canApply` precondition ahead of builder tasks so that no
/// subprocess is spawned for an empty package.
#[derive(Debug, Default)]
pub struct CanCompile;

#[async_trait]
impl TaskAction for CanCompile {
    async fn apply(
        &self,
        _runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        let reason = match &request.working {
            None => Some("working package is missing"),
            Some(working) if working.root_file.is_empty() => Some("root file is empty"),
            Some(_) => None,
        };

        match reason {
            Some(reason) => Err(ConversionError::Precondition {
                task: "canCompile".to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}
