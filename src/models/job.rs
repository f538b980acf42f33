use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Created,
    Authenticating,
    Navigating,
    DetectingForms,
    FillingForms,
    Submitting,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Position in the happy path. Failed and Cancelled sit after everything.
    fn rank(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Authenticating => 1,
            JobState::Navigating => 2,
            JobState::DetectingForms => 3,
            JobState::FillingForms => 4,
            JobState::Submitting => 5,
            JobState::Completed | JobState::Failed | JobState::Cancelled => 6,
        }
    }

    /// Whether this state is one of the working phases a retry may return to
    pub fn is_working_phase(self) -> bool {
        matches!(
            self,
            JobState::Authenticating
                | JobState::Navigating
                | JobState::DetectingForms
                | JobState::FillingForms
                | JobState::Submitting
        )
    }

    /// Forward-only transition rule. Staying in place is allowed so a phase
    /// can report intermediate messages.
    pub fn can_advance_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed | JobState::Cancelled => true,
            JobState::Created => self == JobState::Created,
            _ => next.rank() >= self.rank(),
        }
    }

    /// Backward transition used by bounded retry loops
    pub fn can_retry_to(self, target: JobState) -> bool {
        !self.is_terminal() && target.is_working_phase() && target.rank() <= self.rank()
    }

    /// Share of overall progress reached on entering this phase
    pub fn base_percent(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Authenticating => 5,
            JobState::Navigating => 10,
            JobState::DetectingForms => 15,
            JobState::FillingForms => 20,
            JobState::Submitting => 95,
            JobState::Completed => 100,
            JobState::Failed | JobState::Cancelled => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Authenticating => "authenticating",
            JobState::Navigating => "navigating",
            JobState::DetectingForms => "detectingForms",
            JobState::FillingForms => "fillingForms",
            JobState::Submitting => "submitting",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files captured when a job fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRefs {
    pub screenshot: Option<String>,
    pub dom_snapshot: Option<String>,
}

/// Classified failure attached to a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub attempt: u32,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<ArtifactRefs>,
}

/// One visit's automation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationJob {
    pub job_id: JobId,
    pub visit_id: String,
    pub visit_url: String,
    pub state: JobState,
    pub dispensers_targeted: Vec<u32>,
    pub current_dispenser_index: usize,
    pub current_fuel_index: usize,
    pub progress_percent: u8,
    pub message: String,
    pub retries: u32,
    pub error_record: Option<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutomationJob {
    pub fn new(job_id: JobId, visit_id: impl Into<String>, visit_url: impl Into<String>) -> Self {
        Self {
            job_id,
            visit_id: visit_id.into(),
            visit_url: visit_url.into(),
            state: JobState::Created,
            dispensers_targeted: Vec::new(),
            current_dispenser_index: 0,
            current_fuel_index: 0,
            progress_percent: 0,
            message: String::new(),
            retries: 0,
            error_record: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        assert!(JobState::Created.can_advance_to(JobState::Authenticating));
        assert!(JobState::Navigating.can_advance_to(JobState::Navigating));
        assert!(JobState::FillingForms.can_advance_to(JobState::Submitting));
        assert!(!JobState::Submitting.can_advance_to(JobState::Navigating));
        assert!(!JobState::Authenticating.can_advance_to(JobState::Created));
    }

    #[test]
    fn failed_and_cancelled_reachable_from_any_running_state() {
        for state in [
            JobState::Created,
            JobState::Authenticating,
            JobState::Navigating,
            JobState::DetectingForms,
            JobState::FillingForms,
            JobState::Submitting,
        ] {
            assert!(state.can_advance_to(JobState::Failed));
            assert!(state.can_advance_to(JobState::Cancelled));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            assert!(!state.can_advance_to(JobState::Failed));
            assert!(!state.can_retry_to(JobState::Authenticating));
        }
    }

    #[test]
    fn retry_goes_back_to_working_phases_only() {
        assert!(JobState::FillingForms.can_retry_to(JobState::Authenticating));
        assert!(JobState::FillingForms.can_retry_to(JobState::FillingForms));
        assert!(!JobState::FillingForms.can_retry_to(JobState::Created));
        assert!(!JobState::Navigating.can_retry_to(JobState::Submitting));
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }
}
