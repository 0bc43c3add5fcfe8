//! Provider 请求、事件与终止结果

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::collaborators::PermissionMode;

/// 终止结果子类型
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorDuringExecution,
    ErrorMaxTurns,
    ErrorMaxBudgetUsd,
    /// Provider 内部多次尝试仍无法产出符合 schema 的输出
    ErrorMaxStructuredOutputRetries,
    #[serde(other)]
    Unknown,
}

impl ResultSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSubtype::Success => "success",
            ResultSubtype::ErrorDuringExecution => "error_during_execution",
            ResultSubtype::ErrorMaxTurns => "error_max_turns",
            ResultSubtype::ErrorMaxBudgetUsd => "error_max_budget_usd",
            ResultSubtype::ErrorMaxStructuredOutputRetries => "error_max_structured_output_retries",
            ResultSubtype::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ResultSubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用量统计
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Provider 终止结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub subtype: ResultSubtype,
    #[serde(default)]
    pub structured_output: Option<serde_json::Value>,
    /// 自由文本结果
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub usage: UsageStats,
    /// 不透明的 provider 会话令牌
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ProviderResult {
    pub fn success(structured_output: serde_json::Value) -> Self {
        Self {
            subtype: ResultSubtype::Success,
            structured_output: Some(structured_output),
            result: None,
            errors: Vec::new(),
            usage: UsageStats::default(),
            session_id: None,
        }
    }

    pub fn failure(subtype: ResultSubtype, errors: Vec<String>) -> Self {
        Self {
            subtype,
            structured_output: None,
            result: None,
            errors,
            usage: UsageStats::default(),
            session_id: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageStats) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// 一次执行请求
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    /// 期望的结构化输出 JSON Schema
    pub output_schema: serde_json::Value,
    pub thinking_budget_tokens: Option<u32>,
    /// 恢复之前的 provider 会话
    pub resume_session_id: Option<String>,
    /// 透传给 provider，进行中的工具调用应尽快停止
    pub cancel_token: CancellationToken,
}

/// Provider 事件流中的单个事件（按到达顺序）
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// 会话建立
    Init {
        provider_session_id: String,
        model: String,
    },
    /// Provider 侧的阶段切换（如 thinking、tool_use、compacting），与 StepPhase 相互独立
    Phase {
        phase: String,
    },
    TextDelta {
        text: String,
    },
    /// 新的思考块开始
    ThinkingStart,
    ThinkingDelta {
        text: String,
    },
    ToolStart {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolStop {
        tool_use_id: String,
        is_error: bool,
    },
    /// 终止结果，之后的事件被忽略
    Result(ProviderResult),
}
