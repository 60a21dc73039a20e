//! Builder task
//!
//! Materialises the working package into the scratch directory and runs
//! its build command sequence. Build failures carry the captured output so
//! a recovery branch can feed it back to an LLM.

use super::TaskAction;
use crate::runner::PipelineRunner;
use async_trait::async_trait;
use portage_core::{ConversionError, ConversionRequest, DeploymentPackage};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Marker in build output that identifies the stale-module failure mode
const UNKNOWN_REVISION: &str = " unknown revision";

fn default_go_build_cmd() -> Vec<String> {
    vec![
        "go mod init example.com".to_string(),
        "go mod tidy".to_string(),
        "go build -o fn .".to_string(),
    ]
}

/// Builds the working package in the scratch directory
#[derive(Debug, Default)]
pub struct GoPackageBuilder;

#[async_trait]
impl TaskAction for GoPackageBuilder {
    async fn apply(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        let start = Instant::now();
        let result = self.build(runner, request).await;
        request.metrics.build_time += start.elapsed();
        result
    }
}

impl GoPackageBuilder {
    async fn build(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        let dir = runner.working_dir().to_path_buf();

        let commands = {
            let working = request
                .working
                .as_ref()
                .ok_or_else(|| ConversionError::Compilation {
                    output: "no working package to build".to_string(),
                })?;
            prepare_build_folder(&dir, working).map_err(|err| ConversionError::Compilation {
                output: format!("failed to prepare build folder: {err}"),
            })?;
            working.build_cmd.clone()
        };

        for command in &commands {
            if let Err(output) = run_build_command(runner, &dir, command).await {
                request.metrics.build_errors += 1;

                if !output.contains(UNKNOWN_REVISION) {
                    debug!("failed to run build command: {}", command);
                    return Err(ConversionError::Compilation { output });
                }

                // A stale go.mod pin; drop the module file, fall back to a
                // fresh module, and give the current command one more try.
                // The remaining commands of the original sequence still run.
                warn!("unknown revision in build output, resetting go module");
                let _ = std::fs::remove_file(dir.join("go.mod"));
                if let Some(working) = request.working.as_mut() {
                    working.build_files.remove("go.mod");
                    working.build_cmd = default_go_build_cmd();
                }

                if let Err(output) = run_build_command(runner, &dir, command).await {
                    request.metrics.build_errors += 1;
                    return Err(ConversionError::Compilation { output });
                }
            }
        }

        Ok(())
    }
}

/// Writes the root file and every build file, removing existing files
/// first to avoid permission issues on overwrite
fn prepare_build_folder(dir: &Path, package: &DeploymentPackage) -> std::io::Result<()> {
    let write_file = |name: &str, content: &str| -> std::io::Result<()> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        std::fs::write(&path, content)
    };

    write_file(&package.root_file_name(), &package.root_file)?;
    for (name, content) in &package.build_files {
        write_file(name, content)?;
    }
    Ok(())
}

/// Runs one whitespace-tokenised command in `dir`, capturing stdout and
/// stderr together. `Err` carries the combined output.
async fn run_build_command(
    runner: &PipelineRunner,
    dir: &Path,
    command_line: &str,
) -> Result<String, String> {
    let mut tokens = command_line.split_whitespace();
    let Some(program) = tokens.next() else {
        return Ok(String::new());
    };

    debug!("running build command: {}", command_line);
    let child = Command::new(program)
        .args(tokens)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(runner.remaining_time(), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(format!("failed to run {command_line}: {err}")),
        Err(_) => return Err(format!("{command_line} exceeded the build deadline")),
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(format!("failed to build. {}\n\n{}", combined, output.status));
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::stub_runner;

    fn request_with(build_cmd: Vec<&str>) -> ConversionRequest {
        let mut source = DeploymentPackage::new("go");
        source.root_file = "package main\n".to_string();
        source
            .build_files
            .insert("helper.go".to_string(), "package main\n".to_string());
        source.build_cmd = build_cmd.into_iter().map(str::to_string).collect();
        ConversionRequest::new(source)
    }

    #[tokio::test]
    async fn test_build_materialises_and_runs_commands() {
        let runner = stub_runner();
        let mut request = request_with(vec!["true"]);

        GoPackageBuilder
            .apply(&runner, &mut request)
            .await
            .unwrap();

        assert!(runner.working_dir().join("main.go").exists());
        assert!(runner.working_dir().join("helper.go").exists());
        assert!(request.metrics.build_time > std::time::Duration::ZERO);
        assert_eq!(request.metrics.build_errors, 0);
    }

    #[tokio::test]
    async fn test_failed_command_aborts_the_sequence() {
        let runner = stub_runner();
        let mut request = request_with(vec!["false", "true"]);

        let err = GoPackageBuilder
            .apply(&runner, &mut request)
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::Compilation { .. }));
        assert_eq!(request.metrics.build_errors, 1);
        assert!(request.metrics.build_time > std::time::Duration::ZERO);
    }

    #[tokio::test]
    async fn test_build_output_is_captured() {
        let runner = stub_runner();
        let mut request = request_with(vec![]);
        request.working.as_mut().unwrap().build_cmd =
            vec!["sh build_fail.sh".to_string()];
        request.working.as_mut().unwrap().build_files.insert(
            "build_fail.sh".to_string(),
            "echo undefined: X\nexit 1\n".to_string(),
        );

        let err = GoPackageBuilder
            .apply(&runner, &mut request)
            .await
            .unwrap_err();

        match err {
            ConversionError::Compilation { output } => {
                assert!(output.contains("undefined: X"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_revision_resets_module_and_retries_once() {
        let runner = stub_runner();
        let mut request = request_with(vec![]);
        {
            let working = request.working.as_mut().unwrap();
            working
                .build_files
                .insert("go.mod".to_string(), "module stale\n".to_string());
            // fails with the marker while go.mod exists, succeeds after the
            // remediation removed it
            working.build_files.insert(
                "probe.sh".to_string(),
                "if [ -f go.mod ]; then echo fetch: unknown revision abc; exit 1; fi\n"
                    .to_string(),
            );
            working.build_cmd = vec!["sh probe.sh".to_string()];
        }

        GoPackageBuilder
            .apply(&runner, &mut request)
            .await
            .unwrap();

        let working = request.working.as_ref().unwrap();
        assert!(!working.build_files.contains_key("go.mod"));
        assert_eq!(working.build_cmd, default_go_build_cmd());
        assert!(!runner.working_dir().join("go.mod").exists());
        assert_eq!(request.metrics.build_errors, 1);
    }
}
