//! Orchestration layer
//!
//! ## Modules
//!
//! ### `job_orchestrator` - single visit
//! - `start_job` / `get_status` / `cancel`
//! - one task and one browser session per job
//! - validates job options before anything is registered
//!
//! ### `batch_processor` - many visits
//! - application setup (`App`)
//! - sequential processing with a delay between visits
//! - resume from a checkpoint, abort rules, final statistics
//!
//! ## Layering
//!
//! ```text
//! batch_processor (Vec<Visit>)
//!     ↓
//! job_orchestrator (one Visit)
//!     ↓
//! workflow::VisitFlow (phases of one job)
//!     ↓
//! services / registry (grades, targeting, recovery, checkpoints)
//!     ↓
//! infrastructure / browser (BrowserSession)
//! ```

pub mod batch_processor;
pub mod job_orchestrator;

pub use batch_processor::{App, BatchProcessor};
pub use job_orchestrator::JobOrchestrator;
