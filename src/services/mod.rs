pub mod instruction_parser;
pub mod plan_builder;
pub mod result_aggregator;

pub use instruction_parser::InstructionParser;
pub use plan_builder::{PlanBuilder, PlanSettings};
pub use result_aggregator::{compute_metrics, derive_status, DocumentFingerprint, ResultAggregator};
