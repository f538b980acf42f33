//! Job orchestrator - orchestration layer
//!
//! Public face of single-visit automation: `start_job` / `get_status` /
//! `cancel`. Each job runs in its own task with its own browser session;
//! the orchestrator keeps only the cancel flag and the task handle, and
//! only while the job runs. The finished job stays in the registry.

use crate::config::{Credentials, JobOptions, PlatformSelectors};
use crate::error::{AppError, AppResult};
use crate::infrastructure::SessionFactory;
use crate::models::job::{AutomationJob, JobId};
use crate::registry::JobRegistry;
use crate::services::{ArtifactWriter, FuelGradeClassifier};
use crate::workflow::{FlowServices, StartJobRequest, VisitCtx, VisitFlow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct JobOrchestrator {
    services: FlowServices,
    cancel_flags: Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>>,
    handles: Arc<Mutex<HashMap<JobId, JoinHandle<AppResult<AutomationJob>>>>>,
}

impl JobOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        registry: Arc<JobRegistry>,
        credentials: Credentials,
    ) -> Self {
        Self {
            services: FlowServices {
                sessions,
                registry,
                grades: FuelGradeClassifier::new(),
                credentials,
                field_template: PlatformSelectors::default().step_field_template,
                artifacts: ArtifactWriter::new(),
            },
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_grade_classifier(mut self, grades: FuelGradeClassifier) -> Self {
        self.services.grades = grades;
        self
    }

    pub fn with_field_template(mut self, template: impl Into<String>) -> Self {
        self.services.field_template = template.into();
        self
    }

    pub fn with_artifact_writer(mut self, artifacts: ArtifactWriter) -> Self {
        self.services.artifacts = artifacts;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.services.registry
    }

    /// Register a job and run it in the background
    pub async fn start_job(&self, request: StartJobRequest) -> AppResult<JobId> {
        let (ctx, cancel) = self.prepare(&request, None).await?;
        let job_id = ctx.job_id;

        let flow = VisitFlow::new(self.services.clone(), ctx, request, cancel);
        let cancel_flags = self.cancel_flags.clone();
        let handles = self.handles.clone();

        // held across spawn so the task cannot clean up before the insert
        let mut tracked = self.handles.lock().await;
        let handle = tokio::spawn(async move {
            let result = flow.run().await;
            if let Err(e) = &result {
                warn!("⚠️ job {} ended without a final state: {}", job_id, e);
            }
            cancel_flags.lock().await.remove(&job_id);
            handles.lock().await.remove(&job_id);
            result
        });
        tracked.insert(job_id, handle);

        Ok(job_id)
    }

    /// Register a job and run it on the caller's task
    pub async fn run_job(
        &self,
        request: StartJobRequest,
        position: Option<(usize, usize)>,
    ) -> AppResult<AutomationJob> {
        let (ctx, cancel) = self.prepare(&request, position).await?;
        let job_id = ctx.job_id;

        let result = VisitFlow::new(self.services.clone(), ctx, request, cancel)
            .run()
            .await;
        self.cancel_flags.lock().await.remove(&job_id);
        result
    }

    /// Wait for a job started with `start_job` to finish. A job that
    /// already finished is answered from the registry.
    pub async fn wait(&self, job_id: JobId) -> AppResult<AutomationJob> {
        let handle = self.handles.lock().await.remove(&job_id);
        let result = match handle {
            Some(handle) => handle
                .await
                .map_err(|e| AppError::Other(format!("job task {} panicked: {}", job_id, e)))?,
            None => self.get_status(job_id).await,
        };
        self.cancel_flags.lock().await.remove(&job_id);
        result
    }

    /// Jobs still holding a cancel flag or a task handle
    pub async fn active_jobs(&self) -> usize {
        let flags = self.cancel_flags.lock().await.len();
        let handles = self.handles.lock().await.len();
        flags.max(handles)
    }

    pub async fn get_status(&self, job_id: JobId) -> AppResult<AutomationJob> {
        self.services.registry.get_job(job_id).await
    }

    /// Request cancellation. Takes effect at the next phase boundary or
    /// between two fuel grade steps.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<()> {
        let flags = self.cancel_flags.lock().await;
        match flags.get(&job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("🛑 cancellation requested for job {}", job_id);
                Ok(())
            }
            None => {
                // known but already finished: nothing to do
                self.services.registry.get_job(job_id).await.map(|_| ())
            }
        }
    }

    async fn prepare(
        &self,
        request: &StartJobRequest,
        position: Option<(usize, usize)>,
    ) -> AppResult<(VisitCtx, Arc<AtomicBool>)> {
        validate_job_options(&request.options)?;

        let job_id = JobId::new();
        self.services
            .registry
            .register_job(AutomationJob::new(
                job_id,
                request.visit_id.clone(),
                request.visit_url.clone(),
            ))
            .await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags.lock().await.insert(job_id, cancel.clone());

        let mut ctx = VisitCtx::new(job_id, request.visit_id.clone(), request.visit_url.clone());
        if let Some((index, total)) = position {
            ctx = ctx.with_position(index, total);
        }
        Ok((ctx, cancel))
    }
}

fn validate_job_options(options: &JobOptions) -> AppResult<()> {
    if options.timeout_per_visit.is_zero() {
        return Err(AppError::invalid_option("timeout_per_visit", "must be greater than zero"));
    }
    if options.phase_timeout.is_zero() {
        return Err(AppError::invalid_option("phase_timeout", "must be greater than zero"));
    }
    if options.retry.max_attempts == 0 {
        return Err(AppError::invalid_option("retry.max_attempts", "must be at least 1"));
    }
    Ok(())
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("field_template", &self.services.field_template)
            .finish_non_exhaustive()
    }
}

