//! Conversion service state and worker
//!
//! Uploads are accepted concurrently but conversions are serialised: one
//! worker consumes the bounded request queue and drives one pipeline
//! execution at a time. Results and metrics live in maps behind a
//! reader/writer lock; fetching a completed job removes it, and a
//! reconfigure clears both maps and swaps in a freshly compiled engine.

use portage_core::{ConversionRequest, DeploymentPackage, RunMetrics};
use portage_engine::compiler::{build_runner, compile, CompileError, PipelineDocument};
use portage_engine::{Pipeline, PipelineRunner};
use portage_llm::JsonMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the upload queue
pub const QUEUE_CAPACITY: usize = 100;

/// A compiled pipeline together with the runner bound to it
pub struct Engine {
    pub pipeline: Pipeline,
    pub runner: PipelineRunner,
}

/// Compiles a pipeline document and builds its runner.
///
/// Environment-provided options are the base defaults; options from the
/// document override them.
pub fn build_engine(document: &str, env_options: &JsonMap) -> Result<Engine, CompileError> {
    let mut parsed = PipelineDocument::parse(document)?;

    let mut merged = env_options.clone();
    for (key, value) in &parsed.default_options {
        merged.insert(key.clone(), value.clone());
    }
    parsed.default_options = merged.clone();

    let pipeline = compile(parsed)?;
    let runner = build_runner(&merged)?;
    Ok(Engine { pipeline, runner })
}

/// Outcome of one conversion, retained until fetched
pub struct CompletedJob {
    pub package: Option<DeploymentPackage>,
    pub error: Option<String>,
}

/// Completed jobs and their metrics
#[derive(Default)]
pub struct Store {
    pub results: HashMap<Uuid, CompletedJob>,
    pub metrics: HashMap<Uuid, RunMetrics>,
}

/// State shared between the HTTP surface and the worker
#[derive(Clone)]
pub struct AppState {
    pub queue: mpsc::Sender<ConversionRequest>,
    pub store: Arc<RwLock<Store>>,
    pub engine: Arc<RwLock<Arc<Engine>>>,
    pub env_options: JsonMap,
}

/// Consumes the request queue and drives one pipeline at a time.
///
/// The engine reference is re-read per request, so a reconfigure takes
/// effect for the next conversion without cancelling the in-flight one.
pub async fn run_worker(
    mut queue: mpsc::Receiver<ConversionRequest>,
    store: Arc<RwLock<Store>>,
    engine: Arc<RwLock<Arc<Engine>>>,
    job_timeout: Duration,
) {
    while let Some(mut request) = queue.recv().await {
        info!("starting request for {}", request.id);
        let current = engine.read().await.clone();
        current
            .runner
            .set_deadline(Some(Instant::now() + job_timeout));

        let outcome = current
            .pipeline
            .execute(&current.runner, &mut request)
            .await;
        current.runner.set_deadline(None);
        request.completed = true;

        let job = match outcome {
            Ok(()) => {
                info!(
                    "request {} converted in {:?}",
                    request.id, request.metrics.total_time
                );
                CompletedJob {
                    package: request.working.clone(),
                    error: None,
                }
            }
            Err(err) => {
                debug!("error converting {}: {}", request.id, err);
                CompletedJob {
                    package: None,
                    error: Some(err.to_string()),
                }
            }
        };

        let mut store = store.write().await;
        store.metrics.insert(request.id, request.metrics.clone());
        store.results.insert(request.id, job);
    }
}
