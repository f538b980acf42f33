pub mod artifact_writer;
pub mod error_classifier;
pub mod fuel_grade;
pub mod targeting;

pub use artifact_writer::ArtifactWriter;
pub use error_classifier::{Decision, ErrorClassifier, RecoveryAction};
pub use fuel_grade::{FuelGradeClassifier, GradeClass};
pub use targeting::{
    parse_dispenser_numbers, plan_visit, resolve_targets, ServiceKind, TargetSelection, VisitPlan,
};
