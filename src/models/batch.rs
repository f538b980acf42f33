use crate::models::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Batch identifier. Kept as a string because callers hand old ids back
/// in to resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new() -> Self {
        Self(format!("batch-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry record for a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
    pub completed_visit_ids: BTreeSet<String>,
    pub failed_visit_ids: BTreeSet<String>,
    pub checkpoint_every: usize,
    pub resume_from_batch_id: Option<BatchId>,
    pub total_visits: usize,
    /// Completions recorded by this run, excluding visits carried over on resume
    pub processed_completions: usize,
}

impl Batch {
    pub fn new(
        batch_id: BatchId,
        total_visits: usize,
        checkpoint_every: usize,
        resume_from_batch_id: Option<BatchId>,
    ) -> Self {
        Self {
            batch_id,
            job_ids: Vec::new(),
            completed_visit_ids: BTreeSet::new(),
            failed_visit_ids: BTreeSet::new(),
            checkpoint_every,
            resume_from_batch_id,
            total_visits,
            processed_completions: 0,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            batch_id: self.batch_id.clone(),
            completed_visit_ids: self.completed_visit_ids.iter().cloned().collect(),
            total_visits: self.total_visits,
            timestamp: Utc::now(),
        }
    }
}

/// Persisted snapshot used for resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub batch_id: BatchId,
    pub completed_visit_ids: Vec<String>,
    pub total_visits: usize,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of `run_batch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: BatchId,
    /// Visits completed by this run, in processing order
    pub completed_visit_ids: Vec<String>,
    /// Visits that failed, in processing order
    pub failed_visit_ids: Vec<String>,
    /// Visits excluded because a resumed checkpoint already had them
    pub skipped_visit_ids: Vec<String>,
    pub aborted_early: bool,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.completed_visit_ids.len() + self.failed_visit_ids.len()
    }
}
