//! 阶段定义与会话状态快照
//!
//! 外部观察者只拿到 SessionState 投影（阶段、活跃工具、流式文本与 step 工作状态）；
//! 完整 Session 由 StepOrchestrator 持有。

use serde::Serialize;

use crate::session::ActiveTool;

/// Session 阶段
///
/// 正常路径：Idle -> LoadingAgent -> Executing -> ProcessingResponse -> 终止态；
/// 评审循环：AwaitingReview -> Regenerating -> ProcessingResponse -> AwaitingReview。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Idle,
    LoadingAgent,
    Executing,
    ProcessingResponse,
    AwaitingReview,
    Regenerating,
    Complete,
    Error,
    Timeout,
    Cancelled,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Idle => "idle",
            StepPhase::LoadingAgent => "loading_agent",
            StepPhase::Executing => "executing",
            StepPhase::ProcessingResponse => "processing_response",
            StepPhase::AwaitingReview => "awaiting_review",
            StepPhase::Regenerating => "regenerating",
            StepPhase::Complete => "complete",
            StepPhase::Error => "error",
            StepPhase::Timeout => "timeout",
            StepPhase::Cancelled => "cancelled",
        }
    }

    /// 终止态：到达后 Session 会被注销
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepPhase::Complete | StepPhase::Error | StepPhase::Timeout | StepPhase::Cancelled
        )
    }
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 只读会话快照（getState 返回值）
#[derive(Clone, Debug, Serialize)]
pub struct SessionState<S> {
    pub session_id: String,
    pub workflow_id: String,
    pub phase: StepPhase,
    pub active_tools: Vec<ActiveTool>,
    pub streaming_text: String,
    pub thinking_blocks: Vec<String>,
    /// step 自定义的工作状态（问题列表、草案计划等）
    pub working_state: S,
}
