//! Factory registries
//!
//! Process-wide, read-only registries mapping string keys to task, client
//! and reader constructors. The pipeline compiler resolves the keys of a
//! pipeline document against these tables.

use crate::task::convert::{CLEANUP_TEMPLATE, CODE_TEMPLATE, FIX_TEMPLATE, REALIGN_TEMPLATE};
use crate::task::{CanCompile, GoPackageBuilder, GoPackageTester, LlmConverter, Noop, TaskAction};
use once_cell::sync::Lazy;
use portage_llm::{
    BasicReader, DeepSeekClient, GeminiClient, GoReader, JsonMap, LlmClient, OllamaClient,
    ReasoningReader, ResponseReader,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructs one task action from its merged arguments
pub type TaskFactory = fn(&JsonMap) -> Arc<dyn TaskAction>;

/// Constructs one unconfigured LLM client
pub type ClientFactory = fn() -> Box<dyn LlmClient>;

/// Task factories, keyed as referenced by pipeline documents
pub static TASK_FACTORIES: Lazy<HashMap<&'static str, TaskFactory>> = Lazy::new(|| {
    let mut factories: HashMap<&'static str, TaskFactory> = HashMap::new();
    factories.insert("goBuilder", |_args| Arc::new(GoPackageBuilder));
    factories.insert("goTester", |args| Arc::new(GoPackageTester::from_args(args)));
    factories.insert("llmTask", |args| {
        Arc::new(LlmConverter::from_args(CODE_TEMPLATE, args))
    });
    factories.insert("cleaner", |args| {
        Arc::new(LlmConverter::new(CLEANUP_TEMPLATE, args.clone()))
    });
    factories.insert("coder", |args| {
        Arc::new(LlmConverter::new(CODE_TEMPLATE, args.clone()))
    });
    factories.insert("fixer", |args| {
        Arc::new(LlmConverter::new(FIX_TEMPLATE, args.clone()))
    });
    factories.insert("realign", |args| {
        Arc::new(LlmConverter::new(REALIGN_TEMPLATE, args.clone()))
    });
    factories.insert("noop", |_args| Arc::new(Noop));
    factories.insert("canCompile", |_args| Arc::new(CanCompile));
    factories
});

/// LLM client factories
pub static CLIENT_FACTORIES: Lazy<HashMap<&'static str, ClientFactory>> = Lazy::new(|| {
    let mut factories: HashMap<&'static str, ClientFactory> = HashMap::new();
    factories.insert("ollama", || Box::new(OllamaClient::new()));
    factories.insert("deepseek", || Box::new(DeepSeekClient::new()));
    factories.insert("gemini", || Box::new(GeminiClient::new()));
    factories
});

/// Builds a response reader by key
pub fn make_reader(key: &str) -> Option<Box<dyn ResponseReader>> {
    match key {
        "basic" => Some(Box::new(BasicReader)),
        "go" => Some(Box::new(GoReader)),
        "reasoning" => Some(Box::new(ReasoningReader::new(Box::new(GoReader)))),
        _ => None,
    }
}

/// Reader a client's response flavour defaults to
pub fn default_reader_for(client_key: &str) -> &'static str {
    match client_key {
        "deepseek" => "reasoning",
        _ => "go",
    }
}
