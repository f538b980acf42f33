//! Visit context
//!
//! Wraps "which visit, which job, where in the batch" for log lines.

use crate::models::job::JobId;
use std::fmt::Display;

#[derive(Debug, Clone)]
pub struct VisitCtx {
    pub job_id: JobId,
    pub visit_id: String,
    pub visit_url: String,
    /// 1-based position and batch size, when run from a batch
    pub position: Option<(usize, usize)>,
}

impl VisitCtx {
    pub fn new(job_id: JobId, visit_id: impl Into<String>, visit_url: impl Into<String>) -> Self {
        Self {
            job_id,
            visit_id: visit_id.into(),
            visit_url: visit_url.into(),
            position: None,
        }
    }

    pub fn with_position(mut self, index: usize, total: usize) -> Self {
        self.position = Some((index, total));
        self
    }
}

impl Display for VisitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some((index, total)) => write!(f, "[visit {}/{} {}]", index, total, self.visit_id),
            None => write!(f, "[visit {}]", self.visit_id),
        }
    }
}
