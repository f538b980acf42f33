//! # Dispenser Form Automation
//!
//! Fills dispenser calibration forms (AccuMeasure metering and open neck
//! prover) on a work-order web platform from structured visit data.
//!
//! ## Architecture
//!
//! ### ① Infrastructure
//! - `infrastructure/` - the `BrowserSession` seam plus `JsExecutor`
//! - `browser/` - chromiumoxide implementation of that seam
//!
//! ### ② Services
//! - `FuelGradeClassifier` - which grades need a metering form
//! - `targeting` - which dispensers a service code covers, and the fill plan
//! - `ErrorClassifier` - error kind and bounded recovery action
//! - `ArtifactWriter` - screenshot / DOM snapshot / failure log
//!
//! ### ③ Registry
//! - `JobRegistry` - single writer of job and batch state, progress events
//! - `CheckpointStore` - persisted batch checkpoints for resume
//!
//! ### ④ Workflow
//! - `VisitFlow` - one job through its phases with recovery
//!
//! ### ⑤ Orchestration
//! - `JobOrchestrator` - start / status / cancel for single visits
//! - `BatchProcessor` - sequential batches with checkpoint and resume
//!
//! ## Module layout

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod services;
pub mod utils;
pub mod workflow;

pub use config::{BatchOptions, Config, JobOptions};
pub use error::{AppError, AppResult, ErrorKind};
pub use infrastructure::{BrowserSession, SessionFactory};
pub use models::{AutomationJob, BatchResult, JobId, JobState, ProgressEvent, Visit};
pub use orchestrator::{App, BatchProcessor, JobOrchestrator};
pub use registry::{JobRegistry, ProgressObserver};
pub use workflow::StartJobRequest;
