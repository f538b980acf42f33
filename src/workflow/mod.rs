pub mod visit_ctx;
pub mod visit_flow;

pub use visit_ctx::VisitCtx;
pub use visit_flow::{FlowServices, StartJobRequest, VisitFlow};
