//! Batch processor - orchestration layer
//!
//! ## Responsibilities
//!
//! 1. **Application setup**: run log, registry, checkpoint store, browser
//!    session factory, job orchestrator
//! 2. **Visit loading**: every `*.toml` in the visits folder
//! 3. **Resume**: drop visits a previous batch already completed
//! 4. **Sequential processing**: one visit at a time with a delay between
//!    visits, never in parallel
//! 5. **Outcome handling**: completions go to the registry (which
//!    checkpoints every N), failures either continue or abort the batch
//! 6. **Summary**: final statistics in the log and the run log file

use crate::browser::ChromeSessionFactory;
use crate::config::{BatchOptions, Config};
use crate::error::{AppResult, ErrorKind};
use crate::models::batch::{Batch, BatchId, BatchResult};
use crate::models::job::JobState;
use crate::models::work_order::Visit;
use crate::orchestrator::JobOrchestrator;
use crate::registry::{FileCheckpointStore, JobRegistry, LogObserver};
use crate::services::{ArtifactWriter, FuelGradeClassifier};
use crate::utils::logging::{
    append_run_summary, init_log_file, log_batch_complete, log_batch_start, log_startup,
    log_visits_loaded, print_final_stats,
};
use crate::workflow::StartJobRequest;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Runs visits one after another through a [`JobOrchestrator`]
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    orchestrator: JobOrchestrator,
}

impl BatchProcessor {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.orchestrator.registry()
    }

    pub async fn run_batch(&self, visits: &[Visit], options: &BatchOptions) -> AppResult<BatchResult> {
        options.validate()?;
        let registry = self.registry();

        let resume_from = options
            .resume_from_batch_id
            .as_deref()
            .map(|id| BatchId::from(id.trim()));
        let carried_over: BTreeSet<String> = match &resume_from {
            Some(id) => registry.load_checkpoint(id).await?,
            None => BTreeSet::new(),
        };

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for visit in visits {
            if !seen.insert(visit.visit_id.as_str()) {
                warn!("⚠️ duplicate visit {} ignored", visit.visit_id);
                continue;
            }
            if carried_over.contains(&visit.visit_id) {
                skipped.push(visit.visit_id.clone());
            } else {
                pending.push(visit);
            }
        }

        let mut batch = Batch::new(
            BatchId::new(),
            seen.len(),
            options.checkpoint_every,
            resume_from,
        );
        batch.completed_visit_ids = carried_over;
        let batch_id = registry.create_batch(batch).await?;
        log_batch_start(batch_id.as_str(), pending.len(), skipped.len());

        let mut result = BatchResult {
            batch_id: batch_id.clone(),
            skipped_visit_ids: skipped,
            ..Default::default()
        };
        let job_options = options.job_options();
        let total = pending.len();
        let mut consecutive_auth_failures = 0u32;

        for (i, visit) in pending.into_iter().enumerate() {
            if i > 0 && !options.delay_between_visits.is_zero() {
                sleep(options.delay_between_visits).await;
            }

            let request = StartJobRequest::from_visit(visit, job_options.clone());
            let (job_id, state, error_kind) =
                match self.orchestrator.run_job(request, Some((i + 1, total))).await {
                    Ok(job) => (
                        Some(job.job_id),
                        job.state,
                        job.error_record.map(|r| r.kind),
                    ),
                    Err(e) => {
                        error!("[visit {}] ❌ job could not run: {}", visit.visit_id, e);
                        (None, JobState::Failed, Some(e.kind()))
                    }
                };
            if let Some(job_id) = job_id {
                registry.attach_job(&batch_id, job_id).await?;
            }

            let succeeded = state == JobState::Completed;
            if succeeded {
                consecutive_auth_failures = 0;
                result.completed_visit_ids.push(visit.visit_id.clone());
                if let Err(e) = registry.record_completion(&batch_id, &visit.visit_id).await {
                    warn!("⚠️ checkpoint save failed: {}", e);
                }
            } else {
                if error_kind == Some(ErrorKind::Authentication) {
                    consecutive_auth_failures += 1;
                } else {
                    consecutive_auth_failures = 0;
                }
                result.failed_visit_ids.push(visit.visit_id.clone());
                registry.record_failure(&batch_id, &visit.visit_id).await?;
            }

            registry
                .report_batch_visit(
                    job_id,
                    state,
                    i + 1,
                    total,
                    format!("visit {} {}", visit.visit_id, state),
                )
                .await;

            if succeeded {
                continue;
            }
            if !options.continue_on_error {
                warn!("⛔ visit {} failed and continue_on_error is off; aborting batch", visit.visit_id);
                result.aborted_early = true;
                break;
            }
            if consecutive_auth_failures >= options.auth_failure_abort_threshold {
                warn!(
                    "⛔ {} consecutive authentication failures; aborting batch",
                    consecutive_auth_failures
                );
                result.aborted_early = true;
                break;
            }
        }

        log_batch_complete(&result);
        Ok(result)
    }
}

/// Application entry point
pub struct App {
    config: Config,
    processor: BatchProcessor,
}

impl App {
    pub async fn initialize(config: Config) -> Result<Self> {
        init_log_file(&config.output_log_file)
            .with_context(|| format!("cannot create log file {}", config.output_log_file))?;
        log_startup(&config);

        if config.credentials.is_empty() {
            warn!("⚠️ PLATFORM_USERNAME / PLATFORM_PASSWORD not set; logins will fail");
        }

        let store = Arc::new(FileCheckpointStore::new(&config.checkpoint_dir));
        let registry = Arc::new(JobRegistry::new(store));
        registry.subscribe(Arc::new(LogObserver)).await;

        let sessions = Arc::new(ChromeSessionFactory::from_config(&config));
        let orchestrator = JobOrchestrator::new(sessions, registry, config.credentials.clone())
            .with_grade_classifier(FuelGradeClassifier::with_overrides(&config.grade_overrides))
            .with_field_template(config.selectors.step_field_template.clone())
            .with_artifact_writer(ArtifactWriter::with_dir(&config.artifact_dir));

        Ok(Self {
            config,
            processor: BatchProcessor::new(orchestrator),
        })
    }

    pub async fn run(&self) -> Result<BatchResult> {
        info!("\n📁 scanning {} for visits...", self.config.visits_folder);
        let visits = crate::models::load_all_visits(&self.config.visits_folder).await?;

        if visits.is_empty() {
            warn!("⚠️ no visit TOML files found, nothing to do");
            return Ok(BatchResult::default());
        }
        log_visits_loaded(visits.len());

        let result = self
            .processor
            .run_batch(&visits, &self.config.batch)
            .await
            .context("batch run failed")?;

        print_final_stats(&result, visits.len(), &self.config.output_log_file);
        append_run_summary(&self.config.output_log_file, &result)?;
        if result.aborted_early || !result.failed_visit_ids.is_empty() {
            info!("↩️ resume with RESUME_BATCH_ID={}", result.batch_id);
        }

        Ok(result)
    }
}

