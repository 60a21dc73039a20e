//! Pipeline compiler
//!
//! Turns a declarative pipeline document (YAML or JSON) into a linked
//! [`Pipeline`]. Compilation runs in two passes: instantiate every task
//! stub through the factory registries, then link successor and recovery
//! references by fixed-point promotion of completable stubs. A pass that
//! promotes nothing while stubs remain means the document references an
//! id that does not exist.

use crate::factory::{
    default_reader_for, make_reader, CLIENT_FACTORIES, TASK_FACTORIES,
};
use crate::pipeline::{Pipeline, TaskNode};
use crate::runner::PipelineRunner;
use crate::task::TaskAction;
use portage_llm::JsonMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// The built-in pipeline document used until the service is reconfigured
pub const DEFAULT_PIPELINE: &str = include_str!("default_pipeline.yaml");

/// Errors raised while compiling a pipeline document
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to parse pipeline document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no converter found for key: {0}")]
    UnknownFactory(String),
    #[error("task '{id}' has no task key")]
    MissingTaskKey { id: String },
    #[error("no root converter found")]
    MissingRoot,
    #[error("unresolved task references: {0}")]
    Unresolved(String),
    #[error("no llm client found for key: {0}")]
    UnknownClient(String),
    #[error("no response reader found for key: {0}")]
    UnknownReader(String),
    #[error("llm client configuration failed: {0}")]
    ClientConfig(String),
    #[error("failed to create scratch directory: {0}")]
    Scratch(String),
}

/// A parsed pipeline document
#[derive(Debug, Deserialize)]
pub struct PipelineDocument {
    /// Default arguments applied to every task
    #[serde(default, rename = "options")]
    pub default_options: JsonMap,
    #[serde(default)]
    pub tasks: Vec<TaskStub>,
}

/// One task entry of a pipeline document
#[derive(Debug, Deserialize)]
pub struct TaskStub {
    pub id: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub task_args: JsonMap,
    #[serde(default, rename = "canApply")]
    pub can_apply: String,
    #[serde(default)]
    pub validation: String,
    #[serde(default)]
    pub recovery: String,
    #[serde(default, rename = "maxRetryCount")]
    pub max_retry_count: u32,
    /// Delay between retries, in milliseconds
    #[serde(default, rename = "retryDelay")]
    pub retry_delay: u64,
    #[serde(default)]
    pub next: Vec<String>,
}

impl PipelineDocument {
    pub fn parse(document: &str) -> Result<Self, CompileError> {
        Ok(serde_yaml::from_str(document)?)
    }
}

/// An instantiated stub waiting for its references to resolve
struct PendingTask {
    stub: TaskStub,
    execute: Arc<dyn TaskAction>,
    can_apply: Option<Arc<dyn TaskAction>>,
    validation: Option<Arc<dyn TaskAction>>,
}

impl PendingTask {
    /// A task is completable once every id it references exists
    fn completable(&self, linked: &HashMap<String, TaskNode>) -> bool {
        let next_resolved = self.stub.next.iter().all(|id| linked.contains_key(id));
        let recovery_resolved =
            self.stub.recovery.is_empty() || linked.contains_key(&self.stub.recovery);
        next_resolved && recovery_resolved
    }

    fn into_node(self) -> TaskNode {
        TaskNode {
            id: self.stub.id,
            execute: Some(self.execute),
            can_apply: self.can_apply,
            validation: self.validation,
            recovery: (!self.stub.recovery.is_empty()).then_some(self.stub.recovery),
            next: self.stub.next,
            // a task always has at least one execution attempt
            max_retry_count: self.stub.max_retry_count.max(1),
            retry_delay: Duration::from_millis(self.stub.retry_delay),
        }
    }
}

/// Instantiates one action by factory key; an empty key yields `None`
fn make_action(key: &str, args: &JsonMap) -> Result<Option<Arc<dyn TaskAction>>, CompileError> {
    if key.is_empty() {
        return Ok(None);
    }
    let factory = TASK_FACTORIES
        .get(key)
        .ok_or_else(|| CompileError::UnknownFactory(key.to_string()))?;
    Ok(Some(factory(args)))
}

/// Compiles a pipeline document into an executable pipeline
pub fn compile_pipeline(document: &str) -> Result<Pipeline, CompileError> {
    let document = PipelineDocument::parse(document)?;
    compile(document)
}

/// Compiles a parsed document
pub fn compile(document: PipelineDocument) -> Result<Pipeline, CompileError> {
    let defaults = document.default_options;
    let mut pending = Vec::new();

    for stub in document.tasks {
        if stub.task.is_empty() {
            return Err(CompileError::MissingTaskKey { id: stub.id });
        }

        // defaults first, stub args win
        let mut args = defaults.clone();
        for (key, value) in &stub.task_args {
            args.insert(key.clone(), value.clone());
        }

        let Some(execute) = make_action(&stub.task, &args)? else {
            return Err(CompileError::MissingTaskKey { id: stub.id });
        };
        // gates and validators see only the shared defaults
        let can_apply = make_action(&stub.can_apply, &defaults)?;
        let validation = make_action(&stub.validation, &defaults)?;

        pending.push(PendingTask {
            stub,
            execute,
            can_apply,
            validation,
        });
    }

    let mut linked: HashMap<String, TaskNode> = HashMap::new();
    while !pending.is_empty() {
        let before = pending.len();
        let (ready, waiting): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|task| task.completable(&linked));

        for task in ready {
            debug!("linked task {}", task.stub.id);
            let node = task.into_node();
            linked.insert(node.id.clone(), node);
        }

        pending = waiting;
        if pending.len() == before {
            let residue: Vec<String> = pending.into_iter().map(|task| task.stub.id).collect();
            return Err(CompileError::Unresolved(residue.join(", ")));
        }
    }

    if !linked.contains_key("root") {
        return Err(CompileError::MissingRoot);
    }
    Ok(Pipeline::new("root", linked))
}

/// Builds the runner for a document's options: constructs and configures
/// the LLM client named by the `client` option and pairs it with the
/// matching response reader (`reader` option overrides the default).
pub fn build_runner(options: &JsonMap) -> Result<PipelineRunner, CompileError> {
    let client_key = options
        .get("client")
        .and_then(|value| value.as_str())
        .unwrap_or("ollama");

    let factory = CLIENT_FACTORIES
        .get(client_key)
        .ok_or_else(|| CompileError::UnknownClient(client_key.to_string()))?;
    let mut client = factory();
    client
        .configure(options)
        .map_err(|err| CompileError::ClientConfig(err.to_string()))?;

    let reader_key = options
        .get("reader")
        .and_then(|value| value.as_str())
        .unwrap_or_else(|| default_reader_for(client_key));
    let reader =
        make_reader(reader_key).ok_or_else(|| CompileError::UnknownReader(reader_key.to_string()))?;

    PipelineRunner::new(client, reader).map_err(|err| CompileError::Scratch(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::stub_runner_with;
    use portage_core::{ConversionRequest, DeploymentPackage};

    #[test]
    fn test_default_pipeline_compiles() {
        let pipeline = compile_pipeline(DEFAULT_PIPELINE).unwrap();
        let tasks = pipeline.tasks();
        assert_eq!(tasks.len(), 5);

        let build = &tasks["build"];
        assert!(build.can_apply.is_some());
        assert_eq!(build.recovery.as_deref(), Some("fix"));
        assert_eq!(build.next, vec!["test".to_string()]);
        assert_eq!(build.max_retry_count, 2);

        let test = &tasks["test"];
        assert_eq!(test.recovery.as_deref(), Some("align"));
    }

    #[test]
    fn test_json_documents_are_accepted() {
        let document = r#"{
            "options": {},
            "tasks": [
                { "id": "root", "task": "noop", "maxRetryCount": 1 }
            ]
        }"#;
        assert!(compile_pipeline(document).is_ok());
    }

    #[test]
    fn test_unknown_factory_key() {
        let document = "tasks:\n  - id: root\n    task: warpDrive\n";
        assert!(matches!(
            compile_pipeline(document),
            Err(CompileError::UnknownFactory(key)) if key == "warpDrive"
        ));
    }

    #[test]
    fn test_unresolved_reference_is_reported() {
        let document = "tasks:\n  - id: root\n    task: noop\n    next: [ghost]\n";
        assert!(matches!(
            compile_pipeline(document),
            Err(CompileError::Unresolved(ids)) if ids.contains("root")
        ));
    }

    #[test]
    fn test_root_is_mandatory() {
        let document = "tasks:\n  - id: start\n    task: noop\n";
        assert!(matches!(
            compile_pipeline(document),
            Err(CompileError::MissingRoot)
        ));
    }

    #[test]
    fn test_retry_count_is_clamped_to_one() {
        let document = "tasks:\n  - id: root\n    task: noop\n    maxRetryCount: 0\n";
        let pipeline = compile_pipeline(document).unwrap();
        assert_eq!(pipeline.tasks()["root"].max_retry_count, 1);
    }

    #[test]
    fn test_stub_args_override_defaults() {
        // a goTester with a json strategy from task_args compiles; the
        // defaults alone would select the plain strategy
        let document = concat!(
            "options:\n",
            "  model_name: qwen2.5-coder:14b\n",
            "tasks:\n",
            "  - id: root\n",
            "    task: goTester\n",
            "    task_args:\n",
            "      strategy: json\n",
        );
        assert!(compile_pipeline(document).is_ok());
    }

    #[tokio::test]
    async fn test_compiled_llm_task_drives_the_bound_client() {
        let document = "tasks:\n  - id: root\n    task: coder\n    maxRetryCount: 1\n";
        let pipeline = compile_pipeline(document).unwrap();

        let runner = stub_runner_with(
            r#"{"main.go": "package main\nfunc Handle() {}\n"}"#,
            false,
        );
        let mut source = DeploymentPackage::new("py");
        source.root_file = "print(int(input())*2)".to_string();
        source.test_files.insert(
            "test/f1.json".to_string(),
            r#"{"input":"21\n","output":"42"}"#.to_string(),
        );
        let mut request = ConversionRequest::new(source);

        pipeline.execute(&runner, &mut request).await.unwrap();

        let working = request.working.as_ref().unwrap();
        assert_eq!(working.suffix, "go");
        assert!(working.root_file.contains("func Handle"));
        assert_eq!(request.metrics.llm_prompt_tokens, 7);
    }

    #[test]
    fn test_build_runner_requires_known_client() {
        let mut options = JsonMap::new();
        options.insert("client".to_string(), "hal9000".into());
        assert!(matches!(
            build_runner(&options),
            Err(CompileError::UnknownClient(_))
        ));
    }

    #[test]
    fn test_build_runner_configures_client() {
        let mut options = JsonMap::new();
        options.insert(
            "OLLAMA_API_URL".to_string(),
            "http://localhost:11434".into(),
        );
        assert!(build_runner(&options).is_ok());

        // a gemini client without its key fails configuration
        options.insert("client".to_string(), "gemini".into());
        assert!(matches!(
            build_runner(&options),
            Err(CompileError::ClientConfig(_))
        ));
    }
}
