//! Visit flow - workflow layer
//!
//! Drives one visit through the job state machine:
//!
//! ```text
//! Created → Authenticating → Navigating → DetectingForms → FillingForms → Submitting → Completed
//!                         (Failed / Cancelled from any non-terminal state)
//! ```
//!
//! Planning (targeting + fuel grade classification) runs before a browser
//! is opened, so Validation failures never touch the platform. Every
//! session call is bounded by the phase timeout and the visit deadline;
//! failures go through the error classifier, which picks the recovery.
//! A cursor over (dispenser, fuel grade) lets FillingForms resume where it
//! stopped after a retry instead of refilling saved forms.

use crate::config::{Credentials, JobOptions};
use crate::error::{AppError, AppResult, BrowserError, ErrorKind, FormError};
use crate::infrastructure::{BrowserSession, ErrorArtifact, FormDetection, FormTarget, SessionFactory};
use crate::models::fill_plan::FillUnit;
use crate::models::job::{AutomationJob, ErrorRecord, JobState};
use crate::models::progress::DispenserContext;
use crate::models::work_order::{Dispenser, Visit, WorkOrder};
use crate::registry::JobRegistry;
use crate::services::targeting::{plan_visit, VisitPlan};
use crate::services::{ArtifactWriter, Decision, ErrorClassifier, FuelGradeClassifier, RecoveryAction};
use crate::workflow::visit_ctx::VisitCtx;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

const ARTIFACT_WAIT: Duration = Duration::from_secs(15);
const CLOSE_WAIT: Duration = Duration::from_secs(10);

/// Share of progress reserved for FillingForms: 20% → 95%
const FILL_START: usize = 20;
const FILL_SPAN: usize = 75;

/// Input for one automation job
#[derive(Debug, Clone)]
pub struct StartJobRequest {
    pub visit_id: String,
    pub visit_url: String,
    pub work_order: WorkOrder,
    pub dispensers: Vec<Dispenser>,
    pub options: JobOptions,
}

impl StartJobRequest {
    pub fn new(
        visit_id: impl Into<String>,
        visit_url: impl Into<String>,
        work_order: WorkOrder,
        dispensers: Vec<Dispenser>,
        options: JobOptions,
    ) -> Self {
        Self {
            visit_id: visit_id.into(),
            visit_url: visit_url.into(),
            work_order,
            dispensers,
            options,
        }
    }

    pub fn from_visit(visit: &Visit, options: JobOptions) -> Self {
        Self::new(
            visit.visit_id.clone(),
            visit.visit_url.clone(),
            visit.work_order.clone(),
            visit.work_order.dispensers.clone(),
            options,
        )
    }
}

/// Collaborators shared by every job
#[derive(Clone)]
pub struct FlowServices {
    pub sessions: Arc<dyn SessionFactory>,
    pub registry: Arc<JobRegistry>,
    pub grades: FuelGradeClassifier,
    pub credentials: Credentials,
    /// Selector template with `{grade}` / `{step}` placeholders
    pub field_template: String,
    pub artifacts: ArtifactWriter,
}

enum PhaseOutcome {
    Done,
    Cancelled,
}

/// Where FillingForms resumes
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    dispenser_index: usize,
    unit_index: usize,
    form_open: bool,
}

/// Visit flow
///
/// - owns the job's browser session for its whole life
/// - the only caller of the session driver
/// - reports every transition and step to the registry
pub struct VisitFlow {
    services: FlowServices,
    ctx: VisitCtx,
    request: StartJobRequest,
    errors: ErrorClassifier,
    cancel: Arc<AtomicBool>,
    session: Option<Box<dyn BrowserSession>>,
    plan: Option<VisitPlan>,
    units: Vec<Vec<FillUnit>>,
    detection: Option<FormDetection>,
    cursor: Cursor,
    /// Failures so far, keyed by kind (and phase for per-phase limits)
    attempts: HashMap<(ErrorKind, Option<JobState>), u32>,
    phase_timeout: Duration,
    deadline: Instant,
}

impl VisitFlow {
    pub fn new(
        services: FlowServices,
        ctx: VisitCtx,
        request: StartJobRequest,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let errors = ErrorClassifier::new(request.options.retry.clone());
        let phase_timeout = request.options.phase_timeout;
        let deadline = Instant::now() + request.options.timeout_per_visit;
        Self {
            services,
            ctx,
            request,
            errors,
            cancel,
            session: None,
            plan: None,
            units: Vec::new(),
            detection: None,
            cursor: Cursor::default(),
            attempts: HashMap::new(),
            phase_timeout,
            deadline,
        }
    }

    /// Run to a terminal state and return the final job record
    pub async fn run(mut self) -> AppResult<AutomationJob> {
        let job_id = self.ctx.job_id;
        info!("{} ▶️ job {} started", self.ctx, job_id);

        if let Err(e) = self.drive().await {
            // registry bookkeeping broke mid-run; still end the job
            error!("{} ❌ job aborted: {}", self.ctx, e);
            let record = self.errors.classify(&e, 1);
            if let Err(e) = self.fail(record).await {
                error!("{} cannot record failure: {}", self.ctx, e);
            }
        }
        self.close_session().await;

        self.services.registry.get_job(job_id).await
    }

    async fn drive(&mut self) -> AppResult<()> {
        let plan = match plan_visit(
            &self.services.grades,
            &self.request.work_order,
            &self.request.dispensers,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                let record = self.errors.classify(&e, 1);
                return self.fail(record).await;
            }
        };

        self.services
            .registry
            .set_targets(self.ctx.job_id, plan.selection.numbers())
            .await?;
        self.units = plan
            .plans
            .iter()
            .map(|p| p.units(&self.services.field_template))
            .collect();
        info!(
            "{} 📋 service {}: dispensers {:?}, {} fill units",
            self.ctx,
            plan.selection.service_code,
            plan.selection.numbers(),
            plan.total_units()
        );
        self.plan = Some(plan);

        let mut phase = JobState::Authenticating;
        loop {
            if self.is_cancelled() {
                return self.finish_cancelled().await;
            }
            self.enter(phase).await?;

            let result = match phase {
                JobState::Authenticating => self.authenticate().await,
                JobState::Navigating => self.navigate().await,
                JobState::DetectingForms => self.detect_forms().await,
                JobState::FillingForms => self.fill_forms().await,
                JobState::Submitting => self.submit().await,
                _ => return Ok(()),
            };

            match result {
                Ok(PhaseOutcome::Done) => match next_phase(phase) {
                    Some(next) => phase = next,
                    None => return self.finish_completed().await,
                },
                Ok(PhaseOutcome::Cancelled) => return self.finish_cancelled().await,
                Err(e) => match self.recover(e, phase).await? {
                    Some(target) => phase = target,
                    None => return Ok(()),
                },
            }
        }
    }

    // ========== phases ==========

    async fn enter(&self, phase: JobState) -> AppResult<()> {
        let message = match phase {
            JobState::Authenticating => "signing in".to_string(),
            JobState::Navigating => format!("opening {}", self.request.visit_url),
            JobState::DetectingForms => "detecting forms".to_string(),
            JobState::FillingForms => format!("filling {} dispensers", self.units.len()),
            JobState::Submitting => "submitting visit".to_string(),
            other => other.to_string(),
        };
        info!("{} {}", self.ctx, message);
        self.services
            .registry
            .update_status(self.ctx.job_id, phase, message, phase.base_percent())
            .await?;
        Ok(())
    }

    async fn authenticate(&mut self) -> AppResult<PhaseOutcome> {
        if self.session.is_none() {
            let limit = self.limit("opening session")?;
            let session = bounded(limit, "opening session", self.services.sessions.open()).await?;
            self.session = Some(session);
        }

        let limit = self.limit("authenticating")?;
        let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
        bounded(limit, "authenticating", session.login(&self.services.credentials)).await?;
        Ok(PhaseOutcome::Done)
    }

    async fn navigate(&mut self) -> AppResult<PhaseOutcome> {
        let limit = self.limit("navigating")?;
        let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
        bounded(limit, "navigating", session.navigate(&self.request.visit_url)).await?;
        Ok(PhaseOutcome::Done)
    }

    async fn detect_forms(&mut self) -> AppResult<PhaseOutcome> {
        let detection = self.fetch_detection().await?;
        info!(
            "{} 🔎 {} existing forms, create available: {}",
            self.ctx,
            detection.existing_forms.len(),
            detection.can_create()
        );

        // every dispenser still to fill needs an update or a create path
        for d in self.cursor.dispenser_index..self.units.len() {
            let number = self.dispenser_number(d);
            if detection.target_for(number).is_none() {
                return Err(FormError::NoCreationAffordance { dispenser: number }.into());
            }
        }
        self.detection = Some(detection);
        Ok(PhaseOutcome::Done)
    }

    async fn fill_forms(&mut self) -> AppResult<PhaseOutcome> {
        let total = self.units.iter().map(Vec::len).sum::<usize>();

        while self.cursor.dispenser_index < self.units.len() {
            let d = self.cursor.dispenser_index;
            let number = self.dispenser_number(d);

            if self.is_cancelled() {
                return Ok(PhaseOutcome::Cancelled);
            }

            if !self.cursor.form_open {
                if self.detection.is_none() {
                    let detection = self.fetch_detection().await?;
                    self.detection = Some(detection);
                }
                let target = self
                    .detection
                    .as_ref()
                    .and_then(|det| det.target_for(number))
                    .ok_or(FormError::NoCreationAffordance { dispenser: number })?;
                info!(
                    "{} 📝 dispenser {}: {}",
                    self.ctx,
                    number,
                    match &target {
                        FormTarget::Existing { form_id } => format!("updating form {}", form_id),
                        FormTarget::Create { .. } => "creating form".to_string(),
                    }
                );

                let limit = self.limit("opening form")?;
                let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
                bounded(limit, "opening form", session.open_form(&target)).await?;
                self.cursor.form_open = true;
            }

            while self.cursor.unit_index < self.units[d].len() {
                if self.is_cancelled() {
                    return Ok(PhaseOutcome::Cancelled);
                }
                let u = self.cursor.unit_index;
                let limit = self.limit("filling forms")?;
                let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
                bounded(limit, "filling forms", session.fill_entries(&self.units[d][u].entries))
                    .await?;

                self.cursor.unit_index += 1;
                self.report_step(d, u, total).await?;
            }

            let limit = self.limit("saving form")?;
            let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
            bounded(limit, "saving form", session.save_form()).await?;
            info!("{} 💾 dispenser {} saved", self.ctx, number);

            self.cursor = Cursor {
                dispenser_index: d + 1,
                unit_index: 0,
                form_open: false,
            };
            // saving changes the form list
            self.detection = None;
        }

        Ok(PhaseOutcome::Done)
    }

    async fn submit(&mut self) -> AppResult<PhaseOutcome> {
        let limit = self.limit("submitting")?;
        let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
        bounded(limit, "submitting", session.submit()).await?;
        Ok(PhaseOutcome::Done)
    }

    async fn fetch_detection(&mut self) -> AppResult<FormDetection> {
        let limit = self.limit("detecting forms")?;
        let session = self.session.as_mut().ok_or(BrowserError::SessionClosed)?;
        bounded(limit, "detecting forms", session.detect_forms()).await
    }

    async fn report_step(&self, d: usize, u: usize, total: usize) -> AppResult<()> {
        let done = self.units[..d].iter().map(Vec::len).sum::<usize>() + self.cursor.unit_index;
        let unit = &self.units[d][u];
        let number = self.dispenser_number(d);
        self.services
            .registry
            .report_step(
                self.ctx.job_id,
                done,
                total,
                fill_percent(done, total),
                DispenserContext {
                    dispenser_number: number,
                    dispenser_index: d,
                    fuel_grade: unit.fuel_grade.clone(),
                    fuel_index: u,
                },
                format!("dispenser {} {} done", number, unit.label),
            )
            .await
    }

    // ========== recovery ==========

    /// Apply the recovery policy. `Some(phase)` means retry from that
    /// phase; `None` means the job has been failed.
    async fn recover(&mut self, err: AppError, phase: JobState) -> AppResult<Option<JobState>> {
        if Instant::now() >= self.deadline {
            let limit = self.request.options.timeout_per_visit;
            let timeout_err = AppError::timeout("visit", limit.as_millis() as u64);
            let mut record = self.errors.classify(&timeout_err, 1);
            record.message = format!("{} (last error: {})", record.message, err);
            self.fail(record).await?;
            return Ok(None);
        }

        let kind = self.errors.kind_of(&err);
        let key = match kind {
            ErrorKind::Form | ErrorKind::Timeout => (kind, Some(phase)),
            _ => (kind, None),
        };
        let attempt = {
            let count = self.attempts.entry(key).or_insert(0);
            *count += 1;
            *count
        };
        let record = self.errors.classify(&err, attempt);
        warn!(
            "{} ⚠️ {} failed ({} error, attempt {}): {}",
            self.ctx, phase, kind, attempt, err
        );

        let (action, delay) = match self.errors.decide(&record) {
            Decision::Retry { action, delay } => (action, delay),
            Decision::GiveUp => {
                self.fail(record).await?;
                return Ok(None);
            }
        };
        self.services
            .registry
            .record_error(self.ctx.job_id, record.clone())
            .await?;

        let wait = delay.min(self.remaining());
        if !wait.is_zero() {
            sleep(wait).await;
        }

        let target = match action {
            RecoveryAction::Reauthenticate { .. } => {
                self.reset_page_state();
                JobState::Authenticating
            }
            RecoveryAction::RecreateSession { .. } => {
                self.close_session().await;
                self.reset_page_state();
                JobState::Authenticating
            }
            RecoveryAction::ReloadAndRetryPhase { .. } => {
                self.reload_page().await;
                self.reset_page_state();
                phase
            }
            RecoveryAction::Backoff { .. } => phase,
            RecoveryAction::ExtendTimeout { .. } => {
                self.phase_timeout = self.phase_timeout.saturating_mul(2);
                phase
            }
            RecoveryAction::Surface => {
                self.fail(record).await?;
                return Ok(None);
            }
        };

        let message = format!(
            "{} error on attempt {}, retrying from {}",
            kind, attempt, target
        );
        info!("{} 🔁 {}", self.ctx, message);
        self.services
            .registry
            .retry_phase(self.ctx.job_id, target, message)
            .await?;
        Ok(Some(target))
    }

    async fn reload_page(&mut self) {
        let Ok(limit) = self.limit("reloading") else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = bounded(limit, "reloading", session.reload()).await {
                warn!("{} reload failed: {}", self.ctx, e);
            }
        }
    }

    /// Forget anything tied to the current page. Saved dispensers stay done.
    fn reset_page_state(&mut self) {
        self.detection = None;
        self.cursor.form_open = false;
        self.cursor.unit_index = 0;
    }

    // ========== terminal states ==========

    async fn fail(&mut self, mut record: ErrorRecord) -> AppResult<()> {
        let job_id = self.ctx.job_id;
        record.recoverable = false;
        error!("{} ❌ {} error: {}", self.ctx, record.kind, record.message);

        if let Some(session) = self.session.as_mut() {
            let artifact = timeout(ARTIFACT_WAIT, session.capture_artifact())
                .await
                .unwrap_or_else(|_| ErrorArtifact::default());
            match self.services.artifacts.write(&job_id, &artifact).await {
                Ok(refs) => record.artifact_refs = Some(refs),
                Err(e) => warn!("{} cannot write artifacts: {}", self.ctx, e),
            }
        }
        if let Err(e) = self
            .services
            .artifacts
            .append_failure(&job_id, &self.ctx.visit_id, &record)
            .await
        {
            warn!("{} cannot append failure log: {}", self.ctx, e);
        }

        let message = record.message.clone();
        self.services.registry.record_error(job_id, record).await?;
        self.services
            .registry
            .update_status(job_id, JobState::Failed, message, 0)
            .await?;
        self.close_session().await;
        Ok(())
    }

    async fn finish_completed(&mut self) -> AppResult<()> {
        self.services
            .registry
            .update_status(self.ctx.job_id, JobState::Completed, "visit submitted", 100)
            .await?;
        info!("{} ✅ completed", self.ctx);
        self.close_session().await;
        Ok(())
    }

    async fn finish_cancelled(&mut self) -> AppResult<()> {
        self.services
            .registry
            .update_status(self.ctx.job_id, JobState::Cancelled, "cancelled by caller", 0)
            .await?;
        info!("{} 🛑 cancelled", self.ctx);
        self.close_session().await;
        Ok(())
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if timeout(CLOSE_WAIT, session.close()).await.is_err() {
                warn!("{} session close timed out", self.ctx);
            }
        }
    }

    // ========== helpers ==========

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time allowed for the next session call
    fn limit(&self, label: &str) -> AppResult<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(AppError::timeout(
                format!("visit ({})", label),
                self.request.options.timeout_per_visit.as_millis() as u64,
            ));
        }
        Ok(self.phase_timeout.min(remaining))
    }

    fn dispenser_number(&self, d: usize) -> u32 {
        self.plan
            .as_ref()
            .and_then(|p| p.plans.get(d))
            .map(|p| p.dispenser_number())
            .unwrap_or_default()
    }
}

fn next_phase(phase: JobState) -> Option<JobState> {
    match phase {
        JobState::Authenticating => Some(JobState::Navigating),
        JobState::Navigating => Some(JobState::DetectingForms),
        JobState::DetectingForms => Some(JobState::FillingForms),
        JobState::FillingForms => Some(JobState::Submitting),
        _ => None,
    }
}

/// Progress after `done` of `total` fill units
fn fill_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return (FILL_START + FILL_SPAN) as u8;
    }
    (FILL_START + FILL_SPAN * done.min(total) / total) as u8
}

async fn bounded<T>(
    limit: Duration,
    label: &str,
    fut: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(label, limit.as_millis() as u64)),
    }
}
