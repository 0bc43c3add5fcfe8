//! 外部协作者接口：Agent 配置加载、暂停策略、审计日志
//!
//! 编排核心只依赖这些 trait；持久化层、UI 桥接等实现位于核心之外，这里附带文件 / 静态 / tracing 三种默认实现。

pub mod agent_config;
pub mod audit;
pub mod pause;

pub use agent_config::{
    AgentConfig, AgentConfigLoader, FileAgentConfigLoader, HookConfig, PermissionMode,
    StaticAgentConfigLoader,
};
pub use audit::{record_audit, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use pause::{PauseBehavior, PauseBehaviorResolver, StaticPauseResolver};
