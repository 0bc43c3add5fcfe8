//! Step 编排：扩展点 trait 与通用编排引擎

pub mod definition;
pub mod orchestrator;

pub use definition::StepDefinition;
pub use orchestrator::{StartOptions, StepOrchestrator, StepServices};
