//! Provider 层：执行请求 / 事件 / 结果类型、provider 抽象、执行适配器与脚本化 Mock

pub mod adapter;
pub mod mock;
pub mod traits;
pub mod types;

pub use adapter::{AgentExecutionAdapter, ExecutionConfig};
pub use mock::{MockBehavior, ScriptStep, ScriptedProvider};
pub use traits::{AgentProvider, ProviderEventStream};
pub use types::{ExecutionRequest, ProviderEvent, ProviderResult, ResultSubtype, UsageStats};
