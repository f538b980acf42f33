use crate::models::job::{JobId, JobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a progress event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressEventType {
    /// The job entered a phase
    Phase,
    /// A fuel grade (or prover form) finished filling
    Step,
    /// A recovery action sent the job back to a phase
    Retry,
    /// The job reached Completed, Failed or Cancelled
    Terminal,
    /// A batch finished one visit
    BatchVisit,
}

/// Where in the fill loop an event happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenserContext {
    pub dispenser_number: u32,
    pub dispenser_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_grade: Option<String>,
    pub fuel_index: usize,
}

/// Event pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Absent only on batch events for a visit whose job never registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub phase: JobState,
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispenser_context: Option<DispenserContext>,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<Option<JobId>>,
        event_type: ProgressEventType,
        phase: JobState,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            event_type,
            phase,
            current: 0,
            total: 0,
            percentage: 0,
            message: String::new(),
            timestamp: Utc::now(),
            dispenser_context: None,
        }
    }

    pub fn with_counts(mut self, current: usize, total: usize) -> Self {
        self.current = current;
        self.total = total;
        self
    }

    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = percentage.min(100);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_dispenser(mut self, context: DispenserContext) -> Self {
        self.dispenser_context = Some(context);
        self
    }
}
