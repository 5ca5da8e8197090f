pub mod plan_ctx;
pub mod step_executor;

pub use plan_ctx::PlanContext;
pub use step_executor::StepExecutor;
