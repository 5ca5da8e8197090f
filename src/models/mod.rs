pub mod county;
pub mod document;
pub mod plan;
pub mod progress;
pub mod request;
pub mod result;

pub use county::{CountyConfig, CountyRegistry, RateLimit};
pub use document::DocumentKind;
pub use plan::{Plan, Step, StepKind};
pub use progress::ProgressEvent;
pub use request::CollectionRequest;
pub use result::{
    ErrorRecord, ExecutionMetrics, ExecutionResult, ExecutionStatus, StepFailure, StepOutcome,
};
