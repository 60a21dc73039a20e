//! LLM converter task
//!
//! The shared executor behind every `llmTask` variant: renders a prompt
//! template against the request, invokes the runner's bound client, and
//! decodes the response into a replacement working package.

use super::TaskAction;
use crate::runner::PipelineRunner;
use async_trait::async_trait;
use portage_core::{ConversionError, ConversionRequest, DeploymentPackage};
use portage_llm::JsonMap;
use std::fmt::Write as _;
use tracing::debug;

/// Initial conversion prompt
pub const CODE_TEMPLATE: &str = include_str!("../prompts/code.md");
/// Source cleanup prompt
pub const CLEANUP_TEMPLATE: &str = include_str!("../prompts/cleanup.md");
/// Rebuild-on-error prompt
pub const FIX_TEMPLATE: &str = include_str!("../prompts/fix.md");
/// Output realignment prompt
pub const REALIGN_TEMPLATE: &str = include_str!("../prompts/realign.md");

/// Prompts one LLM invocation and replaces the working package with the
/// decoded response
pub struct LlmConverter {
    template: String,
    args: JsonMap,
}

impl LlmConverter {
    pub fn new(template: impl Into<String>, args: JsonMap) -> Self {
        Self {
            template: template.into(),
            args,
        }
    }

    /// Builds a converter from task args; an explicit `prompt_template`
    /// argument overrides the built-in template
    pub fn from_args(template: &str, args: &JsonMap) -> Self {
        let template = args
            .get("prompt_template")
            .and_then(|value| value.as_str())
            .unwrap_or(template);
        Self::new(template, args.clone())
    }
}

#[async_trait]
impl TaskAction for LlmConverter {
    async fn apply(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        let current = request
            .working
            .clone()
            .unwrap_or_else(|| request.source.clone());

        let fixture = current
            .first_fixture()
            .or_else(|| request.source.first_fixture())
            .unwrap_or_default();

        let prompt = render_template(
            &self.template,
            &[
                ("code", &render_code_block(&current)),
                ("issue", &request.last_issue()),
                ("original", &request.source.root_file),
                ("input", &fixture.input),
                ("output", &fixture.output),
            ],
        );

        let (response, metrics) = {
            let mut client = runner.client().lock().await;
            client
                .prepare(&self.args)
                .map_err(|err| ConversionError::Llm(err.to_string()))?;

            let (response, metrics) = client
                .invoke(&prompt)
                .await
                .map_err(|err| ConversionError::Llm(err.to_string()))?;
            client.log_exchange(&request.source.root_file, &response, &prompt);
            (response, metrics)
        };

        request.metrics.llm_time += metrics.total;
        request.metrics.llm_prompt_time += metrics.prompt;
        request.metrics.llm_eval_time += metrics.eval;
        request.metrics.llm_prompt_tokens += metrics.prompt_tokens;
        request.metrics.llm_eval_tokens += metrics.eval_tokens;

        match runner.reader().decode(&response, &current) {
            Ok(package) => {
                debug!("new deployment package with {} build files", package.build_files.len());
                request.working = Some(package);
                Ok(())
            }
            Err(err) => {
                let err = ConversionError::Llm(err.to_string());
                request.push_error(err.clone());
                Err(err)
            }
        }
    }
}

/// Renders the `#### name` code-block dump of a package
pub fn render_code_block(package: &DeploymentPackage) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "#### {}", package.root_file_name());
    block.push_str(&package.root_file);
    block.push_str("\n\n");
    for (name, content) in &package.build_files {
        let _ = writeln!(block, "#### {name}");
        block.push_str(content);
        block.push_str("\n\n");
    }
    block
}

/// Substitutes `{{key}}` placeholders
fn render_template(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in fields {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::stub_runner_with;

    fn request() -> ConversionRequest {
        let mut source = DeploymentPackage::new("py");
        source.root_file = "print(int(input())*2)".to_string();
        source.test_files.insert(
            "test/f1.json".to_string(),
            r#"{"input":"21\n","output":"42"}"#.to_string(),
        );
        ConversionRequest::new(source)
    }

    #[test]
    fn test_render_template_substitutes_fields() {
        let out = render_template("a {{code}} b {{issue}}", &[("code", "X"), ("issue", "Y")]);
        assert_eq!(out, "a X b Y");
    }

    #[test]
    fn test_render_code_block_lists_all_files() {
        let mut package = DeploymentPackage::new("go");
        package.root_file = "package main".to_string();
        package
            .build_files
            .insert("go.mod".to_string(), "module example.com".to_string());

        let block = render_code_block(&package);
        assert!(block.starts_with("#### main.go\npackage main"));
        assert!(block.contains("#### go.mod\nmodule example.com"));
    }

    #[tokio::test]
    async fn test_successful_conversion_replaces_working_package() {
        let runner = stub_runner_with(
            r#"{"main.go": "package main\nfunc Handle() {}\n"}"#,
            false,
        );
        let mut request = request();
        let converter = LlmConverter::new(CODE_TEMPLATE, JsonMap::new());

        converter.apply(&runner, &mut request).await.unwrap();

        let working = request.working.as_ref().unwrap();
        assert_eq!(working.suffix, "go");
        assert!(working.root_file.contains("func Handle"));
        assert!(working.test_files.contains_key("test/f1.json"));
        assert_eq!(request.metrics.llm_prompt_tokens, 7);
        assert_eq!(request.metrics.llm_eval_tokens, 11);
    }

    #[tokio::test]
    async fn test_invoke_failure_is_an_llm_error() {
        let runner = stub_runner_with("", true);
        let mut request = request();
        let converter = LlmConverter::new(CODE_TEMPLATE, JsonMap::new());

        let err = converter.apply(&runner, &mut request).await.unwrap_err();
        assert!(matches!(err, ConversionError::Llm(_)));
        // invoke failures are reported by the engine, not self-recorded
        assert!(request.errors.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_response_is_recorded_and_propagated() {
        let runner = stub_runner_with("no json here at all", false);
        let mut request = request();
        let converter = LlmConverter::new(CODE_TEMPLATE, JsonMap::new());

        let err = converter.apply(&runner, &mut request).await.unwrap_err();
        assert!(matches!(err, ConversionError::Llm(_)));
        assert_eq!(request.errors.len(), 1);
        // the working package is left untouched for the next attempt
        assert_eq!(request.working.as_ref().unwrap().suffix, "py");
    }

    #[tokio::test]
    async fn test_prompt_template_override_from_args() {
        let mut args = JsonMap::new();
        args.insert(
            "prompt_template".to_string(),
            "only {{code}}".to_string().into(),
        );
        let converter = LlmConverter::from_args(CODE_TEMPLATE, &args);
        assert_eq!(converter.template, "only {{code}}");
    }
}
