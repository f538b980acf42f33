//! Job/Batch registry - the single writer of job and batch state
//!
//! Every mutation goes through one `tokio::sync::Mutex`. Mutations that emit
//! a progress event first take a separate emit lock and keep it until the
//! event is delivered, so observers see events in exactly the order state
//! changed. The state lock itself is released before any observer runs:
//! observers may read the registry from `on_event`, but must not write to it.

use crate::error::{AppResult, JobError};
use crate::models::batch::{Batch, BatchId};
use crate::models::job::{AutomationJob, ErrorRecord, JobId, JobState};
use crate::models::progress::{DispenserContext, ProgressEvent, ProgressEventType};
use crate::registry::checkpoint_store::{CheckpointStore, MemoryCheckpointStore};
use crate::registry::observer::ProgressObserver;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<JobId, AutomationJob>,
    batches: HashMap<BatchId, Batch>,
}

pub struct JobRegistry {
    state: Mutex<RegistryState>,
    /// Held from mutation to delivery of its event. Always taken before `state`.
    emit_order: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
    sender: broadcast::Sender<ProgressEvent>,
    store: Arc<dyn CheckpointStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(RegistryState::default()),
            emit_order: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            sender,
            store,
        }
    }

    /// Registry backed by an in-process checkpoint store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCheckpointStore::new()))
    }

    // ------------------------------------------------------------------
    // subscriptions
    // ------------------------------------------------------------------

    pub async fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Raw event stream. Slow receivers may lag and miss events.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    async fn emit(&self, event: ProgressEvent) {
        for observer in self.observers.read().await.iter() {
            observer.on_event(&event).await;
        }
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    // ------------------------------------------------------------------
    // jobs
    // ------------------------------------------------------------------

    pub async fn register_job(&self, job: AutomationJob) -> AppResult<()> {
        let mut state = self.state.lock().await;
        debug!("register job {} for visit {}", job.job_id, job.visit_id);
        state.jobs.insert(job.job_id, job);
        Ok(())
    }

    /// Move a job forward. Backward moves are rejected, progress never
    /// decreases, and Completed always reports 100.
    pub async fn update_status(
        &self,
        job_id: JobId,
        next: JobState,
        message: impl Into<String>,
        progress_percent: u8,
    ) -> AppResult<AutomationJob> {
        let message = message.into();
        let _order = self.emit_order.lock().await;
        let mut state = self.state.lock().await;
        let job = job_mut(&mut state, job_id)?;

        if !job.state.can_advance_to(next) {
            return Err(JobError::InvalidTransition {
                from: job.state.to_string(),
                to: next.to_string(),
            }
            .into());
        }

        job.state = next;
        job.message = message.clone();
        job.progress_percent = job.progress_percent.max(progress_percent.min(100));
        if next == JobState::Completed {
            job.progress_percent = 100;
        }
        if next.is_terminal() {
            job.completed_at = Some(Utc::now());
        }

        let event_type = if next.is_terminal() {
            ProgressEventType::Terminal
        } else {
            ProgressEventType::Phase
        };
        let event = ProgressEvent::new(job_id, event_type, next)
            .with_counts(job.current_dispenser_index, job.dispensers_targeted.len())
            .with_percentage(job.progress_percent)
            .with_message(message);
        let snapshot = job.clone();
        drop(state);

        self.emit(event).await;
        Ok(snapshot)
    }

    /// Send a job back to an earlier working phase for a bounded retry
    pub async fn retry_phase(
        &self,
        job_id: JobId,
        phase: JobState,
        message: impl Into<String>,
    ) -> AppResult<AutomationJob> {
        let message = message.into();
        let _order = self.emit_order.lock().await;
        let mut state = self.state.lock().await;
        let job = job_mut(&mut state, job_id)?;

        if !job.state.can_retry_to(phase) {
            return Err(JobError::InvalidTransition {
                from: job.state.to_string(),
                to: phase.to_string(),
            }
            .into());
        }

        job.state = phase;
        job.retries += 1;
        job.message = message.clone();

        let event = ProgressEvent::new(job_id, ProgressEventType::Retry, phase)
            .with_counts(job.retries as usize, 0)
            .with_percentage(job.progress_percent)
            .with_message(message);
        let snapshot = job.clone();
        drop(state);

        self.emit(event).await;
        Ok(snapshot)
    }

    pub async fn set_targets(&self, job_id: JobId, dispensers: Vec<u32>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        job_mut(&mut state, job_id)?.dispensers_targeted = dispensers;
        Ok(())
    }

    /// One fill unit finished
    pub async fn report_step(
        &self,
        job_id: JobId,
        current: usize,
        total: usize,
        progress_percent: u8,
        context: DispenserContext,
        message: impl Into<String>,
    ) -> AppResult<()> {
        let message = message.into();
        let _order = self.emit_order.lock().await;
        let mut state = self.state.lock().await;
        let job = job_mut(&mut state, job_id)?;

        job.current_dispenser_index = context.dispenser_index;
        job.current_fuel_index = context.fuel_index;
        job.progress_percent = job.progress_percent.max(progress_percent.min(100));
        job.message = message.clone();

        let event = ProgressEvent::new(job_id, ProgressEventType::Step, job.state)
            .with_counts(current, total)
            .with_percentage(job.progress_percent)
            .with_message(message)
            .with_dispenser(context);
        drop(state);

        self.emit(event).await;
        Ok(())
    }

    pub async fn record_error(&self, job_id: JobId, record: ErrorRecord) -> AppResult<()> {
        let mut state = self.state.lock().await;
        job_mut(&mut state, job_id)?.error_record = Some(record);
        Ok(())
    }

    pub async fn get_job(&self, job_id: JobId) -> AppResult<AutomationJob> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| not_found(job_id).into())
    }

    /// Drop a finished job from the registry
    pub async fn acknowledge(&self, job_id: JobId) -> AppResult<AutomationJob> {
        let mut state = self.state.lock().await;
        let terminal = job_mut(&mut state, job_id)?.is_terminal();
        if !terminal {
            return Err(JobError::NotTerminal {
                job_id: job_id.to_string(),
            }
            .into());
        }
        state
            .jobs
            .remove(&job_id)
            .ok_or_else(|| not_found(job_id).into())
    }

    // ------------------------------------------------------------------
    // batches
    // ------------------------------------------------------------------

    /// Register a batch and persist its starting record, seeded with the
    /// visits carried over from a resumed batch, so its id can be resumed
    /// even if no checkpoint is ever written.
    pub async fn create_batch(&self, batch: Batch) -> AppResult<BatchId> {
        let batch_id = batch.batch_id.clone();
        self.store.save_batch_record(&batch_id, &batch.checkpoint()).await?;

        let mut state = self.state.lock().await;
        info!(
            "batch {} created: {} visits, {} carried over",
            batch_id,
            batch.total_visits,
            batch.completed_visit_ids.len()
        );
        state.batches.insert(batch_id.clone(), batch);
        Ok(batch_id)
    }

    pub async fn attach_job(&self, batch_id: &BatchId, job_id: JobId) -> AppResult<()> {
        let mut state = self.state.lock().await;
        batch_mut(&mut state, batch_id)?.job_ids.push(job_id);
        Ok(())
    }

    /// Add a visit to `completedVisitIds`. Every `checkpoint_every`
    /// completions of this run the snapshot is persisted; returns whether
    /// that happened.
    pub async fn record_completion(&self, batch_id: &BatchId, visit_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let batch = batch_mut(&mut state, batch_id)?;

        batch.failed_visit_ids.remove(visit_id);
        if !batch.completed_visit_ids.insert(visit_id.to_string()) {
            return Ok(false);
        }
        batch.processed_completions += 1;

        if batch.processed_completions % batch.checkpoint_every.max(1) != 0 {
            return Ok(false);
        }

        let snapshot = batch.checkpoint();
        // keep the lock: the next completion must not race this save
        self.store.save_checkpoint(batch_id, &snapshot).await?;
        info!(
            "💾 checkpoint {}: {}/{} visits completed",
            batch_id,
            snapshot.completed_visit_ids.len(),
            snapshot.total_visits
        );
        Ok(true)
    }

    pub async fn record_failure(&self, batch_id: &BatchId, visit_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let batch = batch_mut(&mut state, batch_id)?;
        if !batch.completed_visit_ids.contains(visit_id) {
            batch.failed_visit_ids.insert(visit_id.to_string());
        }
        Ok(())
    }

    /// Emit the per-visit batch event, in processing order. `job_id` is
    /// `None` when the visit never got a registered job.
    pub async fn report_batch_visit(
        &self,
        job_id: Option<JobId>,
        outcome: JobState,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) {
        let _order = self.emit_order.lock().await;
        let percentage = if total == 0 {
            100
        } else {
            ((current * 100) / total).min(100) as u8
        };
        let event = ProgressEvent::new(job_id, ProgressEventType::BatchVisit, outcome)
            .with_counts(current, total)
            .with_percentage(percentage)
            .with_message(message);
        self.emit(event).await;
    }

    /// Completed visit ids of a batch: the live record if this process
    /// knows the batch, otherwise the persisted batch record merged with
    /// its latest checkpoint.
    pub async fn load_checkpoint(&self, batch_id: &BatchId) -> AppResult<BTreeSet<String>> {
        {
            let state = self.state.lock().await;
            if let Some(batch) = state.batches.get(batch_id) {
                return Ok(batch.completed_visit_ids.clone());
            }
        }

        let record = self.store.load_batch_record(batch_id).await?;
        let checkpoint = self.store.load_checkpoint(batch_id).await?;
        if record.is_none() && checkpoint.is_none() {
            return Err(batch_not_found(batch_id).into());
        }
        if record.is_none() {
            warn!("⚠️ batch {} has a checkpoint but no batch record", batch_id);
        }

        Ok(record
            .into_iter()
            .chain(checkpoint)
            .flat_map(|c| c.completed_visit_ids)
            .collect())
    }

    pub async fn batch(&self, batch_id: &BatchId) -> AppResult<Batch> {
        let state = self.state.lock().await;
        state
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| batch_not_found(batch_id).into())
    }
}

fn job_mut(state: &mut RegistryState, job_id: JobId) -> Result<&mut AutomationJob, JobError> {
    state.jobs.get_mut(&job_id).ok_or_else(|| not_found(job_id))
}

fn batch_mut<'a>(state: &'a mut RegistryState, batch_id: &BatchId) -> Result<&'a mut Batch, JobError> {
    state
        .batches
        .get_mut(batch_id)
        .ok_or_else(|| batch_not_found(batch_id))
}

fn not_found(job_id: JobId) -> JobError {
    JobError::NotFound {
        job_id: job_id.to_string(),
    }
}

fn batch_not_found(batch_id: &BatchId) -> JobError {
    JobError::BatchNotFound {
        batch_id: batch_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use crate::models::batch::Checkpoint;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressObserver for Recorder {
        async fn on_event(&self, event: &ProgressEvent) {
            self.events.lock().await.push(event.clone());
        }
    }

    /// Looks the job up again for every event it sees
    struct SnapshotObserver {
        registry: std::sync::Weak<JobRegistry>,
        seen: Mutex<Vec<JobState>>,
    }

    #[async_trait]
    impl ProgressObserver for SnapshotObserver {
        async fn on_event(&self, event: &ProgressEvent) {
            let (Some(registry), Some(job_id)) = (self.registry.upgrade(), event.job_id) else {
                return;
            };
            if let Ok(job) = registry.get_job(job_id).await {
                self.seen.lock().await.push(job.state);
            }
        }
    }

    async fn drive_to_completion(registry: &JobRegistry, job_id: JobId) -> AppResult<AutomationJob> {
        registry
            .update_status(job_id, JobState::Authenticating, "login", 5)
            .await?;
        registry
            .retry_phase(job_id, JobState::Authenticating, "again")
            .await?;
        let context = DispenserContext {
            dispenser_number: 1,
            dispenser_index: 0,
            fuel_grade: None,
            fuel_index: 0,
        };
        registry.report_step(job_id, 1, 1, 50, context, "step").await?;
        registry
            .update_status(job_id, JobState::Completed, "done", 100)
            .await
    }

    async fn registry_with_job() -> (JobRegistry, JobId) {
        let registry = JobRegistry::in_memory();
        let job_id = JobId::new();
        registry
            .register_job(AutomationJob::new(job_id, "v1", "https://x/visits/1"))
            .await
            .unwrap();
        (registry, job_id)
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let (registry, job_id) = registry_with_job().await;
        registry
            .update_status(job_id, JobState::Authenticating, "login", 40)
            .await
            .unwrap();
        let job = registry
            .update_status(job_id, JobState::Navigating, "nav", 10)
            .await
            .unwrap();
        assert_eq!(job.progress_percent, 40);
    }

    #[tokio::test]
    async fn backward_update_is_rejected_but_retry_is_allowed() {
        let (registry, job_id) = registry_with_job().await;
        registry
            .update_status(job_id, JobState::FillingForms, "fill", 20)
            .await
            .unwrap();
        let err = registry
            .update_status(job_id, JobState::Navigating, "back", 20)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::InvalidTransition { .. })));

        let job = registry
            .retry_phase(job_id, JobState::Authenticating, "re-login")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Authenticating);
        assert_eq!(job.retries, 1);
        assert_eq!(job.progress_percent, 20);
    }

    #[tokio::test]
    async fn observers_see_events_in_order() {
        let (registry, job_id) = registry_with_job().await;
        let recorder = Arc::new(Recorder::default());
        registry.subscribe(recorder.clone()).await;
        let mut rx = registry.subscribe_channel();

        for (state, pct) in [
            (JobState::Authenticating, 5),
            (JobState::Navigating, 10),
            (JobState::Completed, 100),
        ] {
            registry.update_status(job_id, state, "", pct).await.unwrap();
        }

        let phases: Vec<_> = recorder.events.lock().await.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![JobState::Authenticating, JobState::Navigating, JobState::Completed]
        );
        assert_eq!(rx.recv().await.unwrap().phase, JobState::Authenticating);
        let last = recorder.events.lock().await.last().cloned().unwrap();
        assert_eq!(last.event_type, ProgressEventType::Terminal);
    }

    #[tokio::test]
    async fn observers_can_read_the_registry() {
        let registry = Arc::new(JobRegistry::in_memory());
        let job_id = JobId::new();
        registry
            .register_job(AutomationJob::new(job_id, "v1", "https://x/visits/1"))
            .await
            .unwrap();
        let observer = Arc::new(SnapshotObserver {
            registry: Arc::downgrade(&registry),
            seen: Mutex::new(Vec::new()),
        });
        registry.subscribe(observer.clone()).await;

        let job = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            drive_to_completion(&registry, job_id),
        )
        .await
        .expect("observer reading the registry blocked the update")
        .unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(
            *observer.seen.lock().await,
            vec![
                JobState::Authenticating,
                JobState::Authenticating,
                JobState::Authenticating,
                JobState::Completed
            ]
        );
    }

    #[tokio::test]
    async fn batch_event_without_a_job_carries_no_job_id() {
        let registry = JobRegistry::in_memory();
        let recorder = Arc::new(Recorder::default());
        registry.subscribe(recorder.clone()).await;

        registry
            .report_batch_visit(None, JobState::Failed, 1, 2, "visit v1 failed")
            .await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].job_id, None);
        assert_eq!(events[0].percentage, 50);
    }

    #[tokio::test]
    async fn terminal_jobs_can_be_acknowledged() {
        let (registry, job_id) = registry_with_job().await;
        assert!(registry.acknowledge(job_id).await.is_err());

        registry
            .record_error(
                job_id,
                ErrorRecord {
                    kind: ErrorKind::Validation,
                    message: "bad".into(),
                    attempt: 1,
                    recoverable: false,
                    artifact_refs: None,
                },
            )
            .await
            .unwrap();
        registry
            .update_status(job_id, JobState::Failed, "bad", 0)
            .await
            .unwrap();

        let job = registry.acknowledge(job_id).await.unwrap();
        assert_eq!(job.error_record.unwrap().kind, ErrorKind::Validation);
        assert!(registry.get_job(job_id).await.is_err());
    }

    #[tokio::test]
    async fn checkpoints_every_n_completions() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let registry = JobRegistry::new(store.clone());
        let batch_id = registry
            .create_batch(Batch::new(BatchId::from("b"), 12, 5, None))
            .await
            .unwrap();

        let mut saved_at = Vec::new();
        for i in 1..=12 {
            if i % 3 == 0 {
                registry.record_failure(&batch_id, &format!("f{}", i)).await.unwrap();
            }
            if registry.record_completion(&batch_id, &format!("v{}", i)).await.unwrap() {
                saved_at.push(i);
            }
        }
        assert_eq!(saved_at, vec![5, 10]);
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.history().await[1].completed_visit_ids.len(), 10);
    }

    #[tokio::test]
    async fn created_batch_is_resumable_before_any_checkpoint() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let registry = JobRegistry::new(store.clone());
        let mut batch = Batch::new(BatchId::from("b2"), 4, 5, Some(BatchId::from("b1")));
        batch.completed_visit_ids = ["v1".to_string(), "v2".to_string()].into_iter().collect();
        let batch_id = registry.create_batch(batch).await.unwrap();
        registry.record_failure(&batch_id, "v3").await.unwrap();
        assert_eq!(store.save_count(), 0);

        // a later process only has the store
        let fresh = JobRegistry::new(store);
        let done = fresh.load_checkpoint(&batch_id).await.unwrap();
        assert_eq!(done.into_iter().collect::<Vec<_>>(), vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn duplicate_completion_is_not_counted() {
        let registry = JobRegistry::in_memory();
        let batch_id = registry
            .create_batch(Batch::new(BatchId::from("b"), 2, 1, None))
            .await
            .unwrap();
        assert!(registry.record_completion(&batch_id, "v1").await.unwrap());
        assert!(!registry.record_completion(&batch_id, "v1").await.unwrap());
        assert_eq!(registry.batch(&batch_id).await.unwrap().processed_completions, 1);
    }

    #[tokio::test]
    async fn load_checkpoint_falls_back_to_store() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store
            .insert(Checkpoint {
                batch_id: BatchId::from("old"),
                completed_visit_ids: vec!["v1".into(), "v2".into()],
                total_visits: 4,
                timestamp: Utc::now(),
            })
            .await;
        let registry = JobRegistry::new(store);

        let done = registry.load_checkpoint(&BatchId::from("old")).await.unwrap();
        assert_eq!(done.len(), 2);
        assert!(registry.load_checkpoint(&BatchId::from("missing")).await.is_err());
    }
}
