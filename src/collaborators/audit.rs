//! 审计 / 诊断日志
//!
//! 以 session id 为键记录结构化事件。写入失败只记 warn，绝不影响编排结果。

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 单条审计事件
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub session_id: String,
    pub workflow_id: String,
    pub step: String,
    /// 事件名，如 step_started / validation_failed / step_completed
    pub event: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        session_id: impl Into<String>,
        workflow_id: impl Into<String>,
        step: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workflow_id: workflow_id.into(),
            step: step.into(),
            event: event.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// workflow 未知时（如校验器内部）只按 session 记录
    pub fn for_session(
        session_id: impl Into<String>,
        step: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::new(session_id, String::new(), step, event, data)
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// 写入审计事件；失败仅告警
pub fn record_audit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event) {
        tracing::warn!(
            session_id = %event.session_id,
            event = %event.event,
            "audit sink failed: {e:#}"
        );
    }
}

/// 以 JSON 形式写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let audit = serde_json::to_string(event)?;
        tracing::info!(audit = %audit, "step_audit");
        Ok(())
    }
}

/// 内存审计（测试用）
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _event: &AuditEvent) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_failing_sink_does_not_panic() {
        let event = AuditEvent::new("s1", "wf-1", "planning", "step_started", serde_json::json!({}));
        record_audit(&FailingSink, event);
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        record_audit(
            &sink,
            AuditEvent::new("s1", "wf-1", "planning", "step_started", serde_json::json!({"a": 1})),
        );
        assert_eq!(sink.event_names(), vec!["step_started"]);
        assert_eq!(sink.events()[0].data["a"], 1);
    }
}
