//! Step 会话
//!
//! 一次 start / retry 对应一个 Session：持有取消令牌、当前阶段、流式诊断文本、
//! 正在执行的工具、加载后的 AgentConfig、超时句柄以及 step 自定义工作状态。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collaborators::AgentConfig;
use crate::core::{SessionState, StepPhase, TimeoutHandle};

/// 正在执行的工具调用
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActiveTool {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub started_at: DateTime<Utc>,
}

/// 单个 step 执行的会话记录
#[derive(Debug)]
pub struct StepSession<S> {
    pub id: String,
    pub workflow_id: String,
    pub cancel_token: CancellationToken,
    pub phase: StepPhase,
    /// 流式文本（仅诊断用，不作为结果依据）
    pub streaming_text: String,
    pub thinking_blocks: Vec<String>,
    pub active_tools: Vec<ActiveTool>,
    /// LoadingAgent 阶段加载，之后不再修改
    pub agent_config: Option<Arc<AgentConfig>>,
    pub timeout: Option<TimeoutHandle>,
    /// Provider 返回的不透明会话令牌（用于恢复）
    pub provider_session_id: Option<String>,
    pub working_state: S,
    pub created_at: DateTime<Utc>,
}

impl<S> StepSession<S> {
    pub fn new(workflow_id: impl Into<String>, working_state: S) -> Self {
        Self {
            id: format!("step_{}", uuid::Uuid::new_v4()),
            workflow_id: workflow_id.into(),
            cancel_token: CancellationToken::new(),
            phase: StepPhase::Idle,
            streaming_text: String::new(),
            thinking_blocks: Vec::new(),
            active_tools: Vec::new(),
            agent_config: None,
            timeout: None,
            provider_session_id: None,
            working_state,
            created_at: Utc::now(),
        }
    }

    /// 清理挂起的超时定时器
    pub fn clear_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.cleanup();
        }
    }

    /// 开始新一轮执行前清空上一轮的流式诊断数据
    pub fn reset_stream(&mut self) {
        self.streaming_text.clear();
        self.thinking_blocks.clear();
        self.active_tools.clear();
    }

    pub fn push_thinking(&mut self, text: &str) {
        match self.thinking_blocks.last_mut() {
            Some(block) => block.push_str(text),
            None => self.thinking_blocks.push(text.to_string()),
        }
    }

    pub fn start_tool(&mut self, tool: ActiveTool) {
        self.active_tools.push(tool);
    }

    /// 结束工具调用，返回被移除的工具
    pub fn stop_tool(&mut self, tool_use_id: &str) -> Option<ActiveTool> {
        let idx = self
            .active_tools
            .iter()
            .position(|t| t.tool_use_id == tool_use_id)?;
        Some(self.active_tools.remove(idx))
    }
}

impl<S: Clone> StepSession<S> {
    pub fn snapshot_with(&self, working_state: S) -> SessionState<S> {
        SessionState {
            session_id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            phase: self.phase,
            active_tools: self.active_tools.clone(),
            streaming_text: self.streaming_text.clone(),
            thinking_blocks: self.thinking_blocks.clone(),
            working_state,
        }
    }
}
