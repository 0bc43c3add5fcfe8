//! Step 流式消息：阶段变化（step 与 provider 两侧）、文本 / 思考增量、工具起止、心跳
//!
//! 每次调用传入一个 mpsc 发送端，同一会话内消息严格按产生顺序送达；接收端（UI 桥接）不属于核心。

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::StepPhase;

/// 单条流式消息（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepStreamMessage {
    PhaseChange {
        session_id: String,
        workflow_id: String,
        phase: StepPhase,
    },
    /// Provider 自身报告的阶段，原样转发
    ProviderPhase {
        session_id: String,
        phase: String,
    },
    TextDelta {
        session_id: String,
        text: String,
    },
    ThinkingDelta {
        session_id: String,
        text: String,
    },
    ToolStart {
        session_id: String,
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolStop {
        session_id: String,
        tool_use_id: String,
        is_error: bool,
    },
    /// 扩展推理期间的保活（此时不转发部分文本）
    Heartbeat {
        session_id: String,
        elapsed_ms: u64,
    },
}

pub type StreamSender = mpsc::UnboundedSender<StepStreamMessage>;

/// 可选发送端的包装；接收端关闭时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct StreamEmitter {
    tx: Option<StreamSender>,
}

impl StreamEmitter {
    pub fn new(tx: Option<StreamSender>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, message: StepStreamMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message);
        }
    }

    pub fn phase_change(&self, session_id: &str, workflow_id: &str, phase: StepPhase) {
        self.emit(StepStreamMessage::PhaseChange {
            session_id: session_id.to_string(),
            workflow_id: workflow_id.to_string(),
            phase,
        });
    }
}
