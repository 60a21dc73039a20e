//! Conversion run metrics
//!
//! Timing and token accounting for a single conversion. Counters are summed
//! when merging; start/end take min/max so a merged record spans every
//! contributing run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Serialises a `Duration` as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Metrics for one conversion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    #[serde(with = "duration_ms")]
    pub total_time: Duration,

    /// Wall time of every LLM call, summed
    #[serde(with = "duration_ms")]
    pub llm_time: Duration,
    #[serde(with = "duration_ms")]
    pub llm_prompt_time: Duration,
    #[serde(with = "duration_ms")]
    pub llm_eval_time: Duration,

    pub llm_prompt_tokens: u64,
    pub llm_eval_tokens: u64,

    #[serde(with = "duration_ms")]
    pub build_time: Duration,
    #[serde(with = "duration_ms")]
    pub test_time: Duration,

    pub build_errors: u64,
    pub test_errors: u64,

    /// Per-fixture pass/fail map
    pub test_cases: BTreeMap<String, bool>,

    /// Number of task executions in the run
    pub tasks: u64,

    /// Messages of every error pushed during the run
    pub issues: Vec<String>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            total_time: Duration::ZERO,
            llm_time: Duration::ZERO,
            llm_prompt_time: Duration::ZERO,
            llm_eval_time: Duration::ZERO,
            llm_prompt_tokens: 0,
            llm_eval_tokens: 0,
            build_time: Duration::ZERO,
            test_time: Duration::ZERO,
            build_errors: 0,
            test_errors: 0,
            test_cases: BTreeMap::new(),
            tasks: 0,
            issues: Vec::new(),
        }
    }
}

impl RunMetrics {
    /// Merges another record into this one: counters and durations are
    /// summed, start/end take min/max, fixture results and issues are
    /// carried over.
    pub fn merge(&mut self, other: &RunMetrics) {
        self.total_time += other.total_time;
        self.llm_time += other.llm_time;
        self.llm_prompt_time += other.llm_prompt_time;
        self.llm_eval_time += other.llm_eval_time;
        self.llm_prompt_tokens += other.llm_prompt_tokens;
        self.llm_eval_tokens += other.llm_eval_tokens;
        self.build_time += other.build_time;
        self.test_time += other.test_time;
        self.build_errors += other.build_errors;
        self.test_errors += other.test_errors;
        self.tasks += other.tasks;

        if self.start_time > other.start_time {
            self.start_time = other.start_time;
        }
        if self.end_time < other.end_time {
            self.end_time = other.end_time;
        }

        for (name, passed) in &other.test_cases {
            self.test_cases.insert(name.clone(), *passed);
        }
        self.issues.extend(other.issues.iter().cloned());
    }

    /// Stamps the end of the run and derives the total duration
    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.total_time = (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
    }
}
