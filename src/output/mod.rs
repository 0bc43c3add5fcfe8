//! 输出层：结构化输出校验与 Outcome 元数据组装

pub mod composer;
pub mod validator;

pub use composer::{ExecutionSummary, OutcomeComposer, OutcomeWithPause};
pub use validator::{output_schema, StructuredOutputValidator, ValidationError, ValidationResult};
