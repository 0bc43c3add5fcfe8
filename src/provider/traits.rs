//! Agent 执行 provider 抽象
//!
//! provider 接收一次 ExecutionRequest，返回按到达顺序排列的事件流，最后一个事件为 Result。
//! 工具沙箱、模型选择、计费等均由 provider 自行负责。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::StepError;
use crate::provider::{ExecutionRequest, ProviderEvent};

pub type ProviderEventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, StepError>> + Send>>;

#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// 发起一次执行，返回事件流
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderEventStream, StepError>;
}
