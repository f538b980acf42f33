//! Progress observers
//!
//! The registry's only outward coupling. Observers are called in emission
//! order; they never see transport details and cannot fail the job.

use crate::models::progress::{ProgressEvent, ProgressEventType};
use async_trait::async_trait;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_event(&self, event: &ProgressEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

#[async_trait]
impl ProgressObserver for LogObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        let json = serde_json::to_string(event).unwrap_or_default();
        let job = event.job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
        match event.event_type {
            ProgressEventType::Phase => {
                info!("▶️ [job {}] {} ({}%)", job, event.phase, event.percentage);
            }
            ProgressEventType::Step => {
                info!(
                    "   ✓ [job {}] {}/{} {}",
                    job, event.current, event.total, event.message
                );
            }
            ProgressEventType::Retry => {
                warn!("🔁 [job {}] {}", job, event.message);
            }
            ProgressEventType::Terminal => {
                info!("🏁 [job {}] {}: {}", job, event.phase, event.message);
            }
            ProgressEventType::BatchVisit => {
                info!("📦 {}/{} {}", event.current, event.total, event.message);
            }
        }
        debug!("progress event: {}", json);
    }
}
