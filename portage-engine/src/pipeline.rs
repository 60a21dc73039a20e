//! Pipeline engine
//!
//! Executes the compiled task graph: precondition gates, bounded retry
//! loops with snapshot/rollback of the working package, recovery branches
//! between failed retries, validators with tail re-entry, and depth-first
//! traversal of successor tasks.
//!
//! The graph is an adjacency list keyed by task id; nodes hold successor
//! ids rather than pointers, and per-run retry counts live in the run
//! state so one compiled pipeline is reusable across requests.

use crate::runner::PipelineRunner;
use crate::task::TaskAction;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use portage_core::{ConversionError, ConversionRequest};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, Once};
use std::time::Duration;
use tracing::{debug, error};

/// One node of the conversion task graph
pub struct TaskNode {
    pub id: String,
    pub execute: Option<std::sync::Arc<dyn TaskAction>>,
    pub can_apply: Option<std::sync::Arc<dyn TaskAction>>,
    pub validation: Option<std::sync::Arc<dyn TaskAction>>,
    /// Task to run between failed retries to repair the working package
    pub recovery: Option<String>,
    pub next: Vec<String>,
    pub max_retry_count: u32,
    pub retry_delay: Duration,
}

/// A compiled task graph with a single entry point
pub struct Pipeline {
    root: String,
    tasks: HashMap<String, TaskNode>,
}

static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);
static PANIC_TRAP: Once = Once::new();

/// Captures panic messages together with the stack trace of the panic
/// site, so the pipeline can report them as errors
fn install_panic_trap() {
    PANIC_TRAP.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = std::backtrace::Backtrace::force_capture();
            if let Ok(mut slot) = LAST_PANIC.lock() {
                *slot = Some(format!("{info}\n{backtrace}"));
            }
            previous(info);
        }));
    });
}

impl Pipeline {
    pub fn new(root: impl Into<String>, tasks: HashMap<String, TaskNode>) -> Self {
        Self {
            root: root.into(),
            tasks,
        }
    }

    /// The graph reachable from the entry task
    pub fn tasks(&self) -> &HashMap<String, TaskNode> {
        &self.tasks
    }

    /// Runs the pipeline for one request.
    ///
    /// Retry counts are reset for every run, timestamps are captured
    /// unconditionally, and a panic inside task code surfaces as
    /// [`ConversionError::Panic`] with the metrics still finalised.
    pub async fn execute(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError> {
        install_panic_trap();

        let mut retries: HashMap<String, u32> =
            self.tasks.keys().map(|id| (id.clone(), 0)).collect();

        request.metrics.start_time = Utc::now();
        let outcome = AssertUnwindSafe(self.execute_task(runner, request, &self.root, &mut retries))
            .catch_unwind()
            .await;
        request.metrics.finish();

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = LAST_PANIC
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .unwrap_or_else(|| panic_payload_message(&payload));
                error!("pipeline execution panic: {}", message);
                let err = ConversionError::Panic(message);
                request.push_error(err.clone());
                Err(err)
            }
        }
    }

    fn execute_task<'a>(
        &'a self,
        runner: &'a PipelineRunner,
        request: &'a mut ConversionRequest,
        task_id: &'a str,
        retries: &'a mut HashMap<String, u32>,
    ) -> BoxFuture<'a, Result<(), ConversionError>> {
        Box::pin(async move {
            let Some(task) = self.tasks.get(task_id) else {
                debug!("task {} is not part of the graph, skipping", task_id);
                return Ok(());
            };
            debug!("starting {}", task.id);
            request.metrics.tasks += 1;

            if let Some(check) = &task.can_apply {
                if let Err(err) = check.apply(runner, request).await {
                    error!("failed to apply task {}: {}", task.id, err);
                    let reason = match &err {
                        ConversionError::Precondition { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    return Err(ConversionError::Precondition {
                        task: task.id.clone(),
                        reason,
                    });
                }
            }

            if let Some(executor) = &task.execute {
                debug!(
                    "running task {} with ({} - {}) executions",
                    task.id,
                    retries.get(task_id).copied().unwrap_or(0),
                    task.max_retry_count
                );
                let mut last_err: Option<ConversionError> = None;

                while retries.get(task_id).copied().unwrap_or(0) < task.max_retry_count {
                    let snapshot = request.working.clone();

                    match executor.apply(runner, request).await {
                        Ok(()) => {
                            debug!("task {} executed successfully", task.id);
                            last_err = None;
                            break;
                        }
                        Err(err) => {
                            let attempt = retries.get(task_id).copied().unwrap_or(0);
                            debug!("task {} retry ({}) failed - {}", task.id, attempt, err);
                            last_err = Some(err.clone());

                            if attempt + 1 < task.max_retry_count {
                                error!("task {} retrying...", task.id);

                                if let Some(recovery_id) = &task.recovery {
                                    request.push_error(err);
                                    debug!(
                                        "attempting to recover task {} before retrying",
                                        task.id
                                    );
                                    match self
                                        .execute_task(runner, request, recovery_id, retries)
                                        .await
                                    {
                                        Ok(()) => {
                                            debug!(
                                                "retrying failed task {} after recovery",
                                                task.id
                                            );
                                            *retries.entry(task_id.to_string()).or_insert(0) += 1;
                                            continue;
                                        }
                                        Err(recovery_err) => {
                                            debug!("recovery failed");
                                            last_err = Some(recovery_err);
                                            break;
                                        }
                                    }
                                }
                                tokio::time::sleep(task.retry_delay).await;
                            }

                            // verify the executor left the working package
                            // in a usable state
                            if request.working.is_some() {
                                if let Some(check) = &task.can_apply {
                                    if check.apply(runner, request).await.is_err() {
                                        error!(
                                            "task {} corrupted the working package, recovering the snapshot",
                                            task.id
                                        );
                                        if snapshot.is_some() {
                                            request.working = snapshot;
                                        }
                                    }
                                }
                            } else if snapshot.is_some() {
                                debug!(
                                    "task {} dropped the working package, recovering the snapshot",
                                    task.id
                                );
                                request.working = snapshot;
                            }

                            *retries.entry(task_id.to_string()).or_insert(0) += 1;
                        }
                    }
                }

                if let Some(err) = last_err {
                    debug!("task {} failed. {}", task.id, err);
                    request.push_error(err.clone());
                    return Err(err);
                }
            } else {
                debug!("task {} is not an executable task, skipping", task.id);
            }

            if let Some(validator) = &task.validation {
                debug!("performing validation for task {}", task.id);
                if let Err(err) = validator.apply(runner, request).await {
                    debug!("task validation for {} failed", task.id);
                    request.push_error(err.clone());
                    let attempts = retries.get(task_id).copied().unwrap_or(0);
                    if attempts < task.max_retry_count {
                        *retries.entry(task_id.to_string()).or_insert(0) += 1;
                        return self.execute_task(runner, request, task_id, retries).await;
                    }
                    return Err(err);
                }
            }

            debug!("task {} executed successfully", task.id);
            for next_id in &task.next {
                if let Err(err) = self.execute_task(runner, request, next_id, retries).await {
                    request.push_error(err.clone());
                    return Err(err);
                }
            }
            Ok(())
        })
    }
}

fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::{stub_runner, FlakyAction};
    use async_trait::async_trait;
    use portage_core::DeploymentPackage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Trace {
        visits: Arc<Mutex<Vec<String>>>,
        name: String,
    }

    #[async_trait]
    impl TaskAction for Trace {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            _request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            self.visits.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskAction for Panics {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            _request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            panic!("task blew up");
        }
    }

    /// Fails until the working package carries the `fixed` marker file
    struct NeedsFix;

    #[async_trait]
    impl TaskAction for NeedsFix {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            let fixed = request
                .working
                .as_ref()
                .is_some_and(|working| working.build_files.contains_key("fixed"));
            if fixed {
                Ok(())
            } else {
                Err(ConversionError::Compilation {
                    output: "undefined: X".to_string(),
                })
            }
        }
    }

    /// Recovery action that repairs the package so the next retry passes
    struct Fixes;

    #[async_trait]
    impl TaskAction for Fixes {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            // the last error is visible to the recovery task
            assert!(request.last_issue().contains("undefined: X"));
            if let Some(working) = request.working.as_mut() {
                working
                    .build_files
                    .insert("fixed".to_string(), String::new());
            }
            Ok(())
        }
    }

    /// Drops the working package and fails
    struct Corrupts;

    #[async_trait]
    impl TaskAction for Corrupts {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            request.working = None;
            Err(ConversionError::Testing { count: 1 })
        }
    }

    fn node(id: &str) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            execute: None,
            can_apply: None,
            validation: None,
            recovery: None,
            next: Vec::new(),
            max_retry_count: 1,
            retry_delay: Duration::ZERO,
        }
    }

    fn request() -> ConversionRequest {
        let mut source = DeploymentPackage::new("py");
        source.root_file = "print(1)".to_string();
        ConversionRequest::new(source)
    }

    #[tokio::test]
    async fn test_traversal_order() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let trace = |name: &str| {
            Some(Arc::new(Trace {
                visits: visits.clone(),
                name: name.to_string(),
            }) as Arc<dyn TaskAction>)
        };

        let mut tasks = HashMap::new();
        let mut root = node("root");
        root.execute = trace("root");
        root.next = vec!["a".to_string(), "b".to_string()];
        let mut a = node("a");
        a.execute = trace("a");
        a.next = vec!["c".to_string()];
        let mut b = node("b");
        b.execute = trace("b");
        b.next = vec!["c".to_string()];
        let mut c = node("c");
        c.execute = trace("c");
        tasks.insert("root".to_string(), root);
        tasks.insert("a".to_string(), a);
        tasks.insert("b".to_string(), b);
        tasks.insert("c".to_string(), c);

        let pipeline = Pipeline::new("root", tasks);
        let runner = stub_runner();
        let mut request = request();
        pipeline.execute(&runner, &mut request).await.unwrap();

        // depth-first: each parent visits each successor once
        assert_eq!(
            *visits.lock().unwrap(),
            vec!["root", "a", "c", "b", "c"]
        );
        assert_eq!(request.metrics.tasks, 5);
        assert!(request.metrics.start_time <= request.metrics.end_time);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut root = node("root");
        root.max_retry_count = 3;
        root.execute = Some(Arc::new(FlakyAction {
            calls: calls.clone(),
            fail_first: 2,
        }));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        pipeline.execute(&runner, &mut request).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!request.completed);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut root = node("root");
        root.max_retry_count = 2;
        root.execute = Some(Arc::new(FlakyAction {
            calls: calls.clone(),
            fail_first: 10,
        }));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        let err = pipeline.execute(&runner, &mut request).await.unwrap_err();

        assert!(matches!(err, ConversionError::Testing { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!request.errors.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_branch_repairs_and_retries() {
        let mut root = node("root");
        root.max_retry_count = 2;
        root.execute = Some(Arc::new(NeedsFix));
        root.recovery = Some("fix".to_string());
        let mut fix = node("fix");
        fix.execute = Some(Arc::new(Fixes));

        let pipeline = Pipeline::new(
            "root",
            HashMap::from([("root".to_string(), root), ("fix".to_string(), fix)]),
        );

        let runner = stub_runner();
        let mut request = request();
        pipeline.execute(&runner, &mut request).await.unwrap();

        // the failed attempt landed in the error history for the recovery
        // prompt, then the retry succeeded
        assert_eq!(request.errors.len(), 1);
        assert!(request
            .working
            .as_ref()
            .unwrap()
            .build_files
            .contains_key("fixed"));
    }

    #[tokio::test]
    async fn test_precondition_failure_aborts() {
        let executed = Arc::new(AtomicUsize::new(0));
        let mut root = node("root");
        root.can_apply = Some(Arc::new(NeedsFix));
        root.execute = Some(Arc::new(FlakyAction {
            calls: executed.clone(),
            fail_first: 0,
        }));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        let err = pipeline.execute(&runner, &mut request).await.unwrap_err();

        assert!(matches!(err, ConversionError::Precondition { .. }));
        // the executor never ran
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_working_package_is_restored() {
        let mut root = node("root");
        root.max_retry_count = 2;
        root.execute = Some(Arc::new(Corrupts));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        let err = pipeline.execute(&runner, &mut request).await.unwrap_err();

        assert!(matches!(err, ConversionError::Testing { .. }));
        // the snapshot was restored after every failed attempt
        assert!(request.working.is_some());
    }

    #[tokio::test]
    async fn test_validation_retries_then_fails() {
        let validations = Arc::new(AtomicUsize::new(0));
        let mut root = node("root");
        root.max_retry_count = 2;
        root.validation = Some(Arc::new(FlakyAction {
            calls: validations.clone(),
            fail_first: 10,
        }));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        let err = pipeline.execute(&runner, &mut request).await.unwrap_err();

        assert!(matches!(err, ConversionError::Testing { .. }));
        // initial pass plus one tail re-entry per remaining retry
        assert_eq!(validations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pipeline_is_reusable_across_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut root = node("root");
        root.max_retry_count = 2;
        root.execute = Some(Arc::new(FlakyAction {
            calls: calls.clone(),
            fail_first: 1,
        }));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));
        let runner = stub_runner();

        let mut first = request();
        pipeline.execute(&runner, &mut first).await.unwrap();

        // retry counts were reset, so the second run has its full budget
        let mut second = request();
        pipeline.execute(&runner, &mut second).await.unwrap();
        assert_eq!(second.metrics.tasks, 1);
    }

    #[tokio::test]
    async fn test_panic_is_captured_and_metrics_finalised() {
        let mut root = node("root");
        root.execute = Some(Arc::new(Panics));
        let pipeline = Pipeline::new("root", HashMap::from([("root".to_string(), root)]));

        let runner = stub_runner();
        let mut request = request();
        let err = pipeline.execute(&runner, &mut request).await.unwrap_err();

        match err {
            ConversionError::Panic(message) => assert!(message.contains("task blew up")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(request.metrics.start_time <= request.metrics.end_time);
        assert_eq!(request.metrics.issues.len(), 1);
    }
}
