//! agentstep - 通用 Agent Step 编排框架
//!
//! 模块划分：
//! - **collaborators**: 外部协作者抽象（AgentConfig 加载、暂停策略、审计）及默认实现
//! - **config**: 编排配置加载（TOML + 环境变量）
//! - **core**: 错误分类、阶段状态、重试计数与退避、超时竞速
//! - **events**: 流式消息（阶段变化、文本 / 思考增量、工具起止、心跳）
//! - **observability**: tracing 订阅器初始化
//! - **output**: 结构化输出校验与 outcome 元数据组装
//! - **provider**: Agent 执行 provider 抽象、执行适配器、脚本化 Mock
//! - **session**: Step 会话与按 workflow 唯一的会话注册表
//! - **step**: StepDefinition 扩展点与通用编排引擎 StepOrchestrator
//! - **steps**: 具体 step（澄清、细化、发现、规划）

pub mod collaborators;
pub mod config;
pub mod core;
pub mod events;
pub mod observability;
pub mod output;
pub mod provider;
pub mod session;
pub mod step;
pub mod steps;

pub use crate::config::{load_config, AppConfig, OrchestratorSettings};
pub use crate::core::{ErrorClass, SessionState, StepError, StepPhase};
pub use crate::events::{StepStreamMessage, StreamSender};
pub use crate::output::OutcomeWithPause;
pub use crate::step::{StartOptions, StepDefinition, StepOrchestrator, StepServices};
