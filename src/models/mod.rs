pub mod batch;
pub mod fill_plan;
pub mod job;
pub mod loaders;
pub mod progress;
pub mod work_order;

pub use batch::{Batch, BatchId, BatchResult, Checkpoint};
pub use fill_plan::{FieldEntry, FillPlan, FillUnit, FormType, FuelStep, MeteringPlan, ProverPlan, StepName};
pub use job::{ArtifactRefs, AutomationJob, ErrorRecord, JobId, JobState};
pub use loaders::{load_all_visits, load_visit};
pub use progress::{DispenserContext, ProgressEvent, ProgressEventType};
pub use work_order::{Dispenser, ServiceCode, Visit, WorkOrder};
