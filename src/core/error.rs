//! 编排错误类型与错误分类
//!
//! StepError 只在编排内部流转，到达 start / cancel / retry 边界时一律转为 Outcome；
//! ErrorClass 决定错误是否适合自动重试。

use thiserror::Error;

use crate::core::retry::is_transient_error;

/// Step 编排过程中可能出现的错误（配置、Provider、会话注册、阶段错误等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// 同一 workflow 已有活跃会话，需先 cancel
    #[error("Session already exists for workflow {0}")]
    SessionExists(String),

    #[error("No active session for workflow {0}")]
    SessionNotFound(String),

    /// Agent 配置加载失败（不存在、已停用、文件损坏等）
    #[error("Failed to load agent config: {0}")]
    AgentConfig(String),

    #[error("Failed to resolve pause behavior: {0}")]
    PauseBehavior(String),

    /// Provider 调用失败（网络、限流、内部错误等）
    #[error("Provider error: {0}")]
    Provider(String),

    /// 事件流结束但没有终止结果
    #[error("Provider stream ended without a result")]
    StreamEnded,

    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// 错误分类：对应配置错误 / 瞬时错误 / 校验错误 / 永久错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Agent / 配置查找失败，不自动重试
    Configuration,
    /// 网络、超时、限流等，可自动重试
    Transient,
    /// 结构化输出不合法
    Validation,
    Permanent,
}

impl StepError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StepError::AgentConfig(_) | StepError::PauseBehavior(_) | StepError::Config(_) => {
                ErrorClass::Configuration
            }
            StepError::Provider(msg) if is_transient_error(msg) => ErrorClass::Transient,
            StepError::StreamEnded => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<config::ConfigError> for StepError {
    fn from(e: config::ConfigError) -> Self {
        StepError::Config(e.to_string())
    }
}
