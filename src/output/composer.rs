//! Outcome 组装：在 step 自身的 outcome 上附加暂停 / 重试 / 用量元数据
//!
//! 附加字段只做加法，序列化时与 step outcome 平铺在同一层，不改动 step 自身字段。

use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::{PauseBehavior, PauseBehaviorResolver};
use crate::provider::{ProviderResult, UsageStats};

/// 从执行结果中提取的元数据
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub provider_session_id: Option<String>,
    pub usage: Option<UsageStats>,
}

impl From<&ProviderResult> for ExecutionSummary {
    fn from(result: &ProviderResult) -> Self {
        Self {
            provider_session_id: result.session_id.clone(),
            usage: Some(result.usage.clone()),
        }
    }
}

/// 带编排元数据的 outcome
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutcomeWithPause<O> {
    #[serde(flatten)]
    pub outcome: O,
    pub pause_requested: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    /// 调用方是否可以走「跳过」路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_fallback_available: Option<bool>,
    /// 错误链详情（诊断用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Outcome 组装器
pub struct OutcomeComposer {
    pause_resolver: Arc<dyn PauseBehaviorResolver>,
    is_gate: bool,
}

impl OutcomeComposer {
    pub fn new(pause_resolver: Arc<dyn PauseBehaviorResolver>, is_gate: bool) -> Self {
        Self {
            pause_resolver,
            is_gate,
        }
    }

    /// 成功路径：按 workflow 暂停策略设置 pause_requested，重试计数归零
    ///
    /// 策略解析失败时按 auto_pause 处理。
    pub async fn build_outcome_with_pause_info<O>(
        &self,
        base: O,
        workflow_id: &str,
        execution: &ExecutionSummary,
        skip_fallback_available: Option<bool>,
    ) -> OutcomeWithPause<O> {
        let behavior = match self.pause_resolver.get_pause_behavior(workflow_id).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(workflow_id, "pause behavior lookup failed, pausing: {e}");
                PauseBehavior::AutoPause
            }
        };

        OutcomeWithPause {
            outcome: base,
            pause_requested: behavior.should_pause(self.is_gate),
            retry_count: 0,
            provider_session_id: execution.provider_session_id.clone(),
            usage: execution.usage.clone(),
            skip_fallback_available,
            error_detail: None,
        }
    }

    /// 错误路径：保留当前重试计数，不请求暂停
    pub fn build_error_outcome_with_retry<O>(
        &self,
        error_outcome: O,
        retry_count: u32,
        skip_fallback_available: Option<bool>,
        error_detail: Option<String>,
    ) -> OutcomeWithPause<O> {
        OutcomeWithPause {
            outcome: error_outcome,
            pause_requested: false,
            retry_count,
            provider_session_id: None,
            usage: None,
            skip_fallback_available,
            error_detail,
        }
    }

    /// 非成功但已拿到执行结果（校验失败、超时、取消等）：保留计数并带上用量
    pub fn build_outcome_with_retry<O>(
        &self,
        outcome: O,
        retry_count: u32,
        execution: Option<&ExecutionSummary>,
        skip_fallback_available: Option<bool>,
    ) -> OutcomeWithPause<O> {
        let execution = execution.cloned().unwrap_or_default();
        OutcomeWithPause {
            outcome,
            pause_requested: false,
            retry_count,
            provider_session_id: execution.provider_session_id,
            usage: execution.usage,
            skip_fallback_available,
            error_detail: None,
        }
    }
}
