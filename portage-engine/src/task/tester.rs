//! Tester task
//!
//! Runs the built program against every fixture of the working package and
//! compares the minimised stdout under the configured validation strategy.

use super::TaskAction;
use crate::runner::PipelineRunner;
use crate::validation::{
    minimize_string, JsonAwareSimilarityValidation, SimilarityValidation, ValidationStrategy,
};
use async_trait::async_trait;
use portage_core::{ConversionError, ConversionRequest, DeploymentPackage, TestFixture};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs the working package's fixtures in the scratch directory
pub struct GoPackageTester {
    validator: Box<dyn ValidationStrategy>,
}

impl GoPackageTester {
    pub fn new(validator: Box<dyn ValidationStrategy>) -> Self {
        Self { validator }
    }

    /// Selects the validation strategy from a `strategy` argument:
    /// `json` for the JSON-aware walk, anything else for plain similarity
    pub fn from_args(args: &serde_json::Map<String, serde_json::Value>) -> Self {
        let validator: Box<dyn ValidationStrategy> =
            match args.get("strategy").and_then(|value| value.as_str()) {
                Some("json") => Box::new(JsonAwareSimilarityValidation::new(0.85)),
                _ => Box::new(SimilarityValidation),
            };
        Self::new(validator)
    }

    async fn run_fixture(
        &self,
        runner: &PipelineRunner,
        package: &DeploymentPackage,
        fixture: &TestFixture,
    ) -> Result<bool, String> {
        let run_cmd = package.run_cmd();
        let mut command = Command::new(&run_cmd[0]);
        command
            .args(&run_cmd[1..])
            .current_dir(runner.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // fixture env is layered over the inherited process environment
        for entry in &fixture.env {
            if let Some((key, value)) = TestFixture::split_env(entry) {
                command.env(key, value);
            }
        }

        let mut child = command.spawn().map_err(|err| err.to_string())?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(fixture.input.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }

        let output = match tokio::time::timeout(runner.remaining_time(), child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(err.to_string()),
            Err(_) => return Err("test run exceeded the deadline".to_string()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!("test failed. {stdout} - {stderr} - {}", output.status));
        }

        let clean = minimize_string(&stdout);
        let passed = if fixture.deterministic {
            self.validator.validate(&clean, &fixture.output)
        } else {
            self.validator.validate_undeterministic(&clean, &fixture.output)
        };
        if !passed {
            debug!(
                "test failed. {}, expected:{}, errors:{}",
                clean, fixture.output, stderr
            );
        }
        Ok(passed)
    }
}

#[async_trait]
impl TaskAction for GoPackageTester {
    async fn apply(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        let start = Instant::now();
        let mut failures = 0usize;

        let working = request
            .working
            .clone()
            .ok_or(ConversionError::Testing { count: 1 })?;

        for (name, fixture) in working.fixtures() {
            // pessimistic write: flipped to true only on success
            request.metrics.test_cases.insert(name.to_string(), false);

            let fixture = match fixture {
                Ok(fixture) => fixture,
                Err(err) => {
                    debug!("failed to read test {}: {}", name, err);
                    failures += 1;
                    continue;
                }
            };

            match self.run_fixture(runner, &working, &fixture).await {
                Ok(true) => {
                    request.metrics.test_cases.insert(name.to_string(), true);
                }
                Ok(false) => {
                    failures += 1;
                    debug!("test {} failed output comparison", name);
                }
                Err(err) => {
                    failures += 1;
                    debug!("test {} failed: {}", name, err);
                }
            }
        }

        request.metrics.test_time += start.elapsed();
        request.metrics.test_errors += failures as u64;

        if failures != 0 {
            return Err(ConversionError::Testing { count: failures });
        }
        Ok(())
    }
}
