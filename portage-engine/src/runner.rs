//! Pipeline runner
//!
//! Owns the resources a pipeline execution needs: the scratch directory
//! candidate code is materialised into, the bound LLM client, and the
//! response reader for the client's response flavour.
//!
//! The runner is single-consumer per request: `prepare` mutates the
//! client's invocation options, so the client sits behind an async mutex
//! and the one-worker scheduling guarantees no contention.

use portage_llm::{LlmClient, ResponseReader};
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-command bound applied when no run deadline is set
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Resources bound to one compiled pipeline
pub struct PipelineRunner {
    scratch: TempDir,
    client: Mutex<Box<dyn LlmClient>>,
    reader: Box<dyn ResponseReader>,
    deadline: StdMutex<Option<Instant>>,
}

impl PipelineRunner {
    /// Creates a runner with a fresh scratch directory.
    ///
    /// The directory lives until the runner is dropped (end of run or
    /// reconfigure); there is at most one scratch directory per runner.
    pub fn new(
        client: Box<dyn LlmClient>,
        reader: Box<dyn ResponseReader>,
    ) -> std::io::Result<Self> {
        let scratch = TempDir::with_prefix("fn_llm")?;
        debug!("created scratch directory {}", scratch.path().display());
        Ok(Self {
            scratch,
            client: Mutex::new(client),
            reader,
            deadline: StdMutex::new(None),
        })
    }

    /// The scratch directory candidate source is materialised into
    pub fn working_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// The bound LLM client
    pub fn client(&self) -> &Mutex<Box<dyn LlmClient>> {
        &self.client
    }

    /// The response reader matching the bound client's response flavour
    pub fn reader(&self) -> &dyn ResponseReader {
        &*self.reader
    }

    /// Sets (or clears) the deadline bounding this run's subprocesses
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock().unwrap() = deadline;
    }

    /// Time budget for the next subprocess: what is left of the run
    /// deadline, or the default command bound when none is set
    pub fn remaining_time(&self) -> Duration {
        match *self.deadline.lock().unwrap() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_secs(1)),
            None => DEFAULT_COMMAND_TIMEOUT,
        }
    }
}
