//! Portage Engine
//!
//! Executes conversions as a directed graph of retryable tasks.
//!
//! Architecture:
//! - Pipeline: task graph execution with retries, recovery branches,
//!   snapshot/rollback and panic capture
//! - Compiler: turns a declarative pipeline document into a linked graph
//! - Factories: process-wide registries for tasks, LLM clients and readers
//! - Tasks: build, test, LLM conversion and precondition checks
//! - Validation: output comparison strategies for the tester

pub mod compiler;
pub mod factory;
pub mod pipeline;
pub mod runner;
pub mod task;
pub mod validation;

pub use compiler::{compile_pipeline, CompileError, PipelineDocument};
pub use pipeline::{Pipeline, TaskNode};
pub use runner::PipelineRunner;
pub use task::TaskAction;
