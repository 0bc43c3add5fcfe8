//! Agent 执行适配器
//!
//! 向 provider 发起一次请求（prompt + AgentConfig 的模型 / 工具 / 权限 + 输出 schema），
//! 按到达顺序消费事件流：累积文本 / 思考到 Session、维护活跃工具、转发流式消息；
//! 取消令牌触发时返回 Ok(None) 而不是错误。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};

use crate::collaborators::{record_audit, AgentConfig, AuditEvent, AuditSink};
use crate::core::StepError;
use crate::events::{StepStreamMessage, StreamEmitter};
use crate::provider::{AgentProvider, ExecutionRequest, ProviderEvent, ProviderResult};
use crate::session::{ActiveTool, SharedSession};

/// 单次执行所需的配置
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub agent: Arc<AgentConfig>,
    pub output_schema: serde_json::Value,
    pub resume_session_id: Option<String>,
}

/// Provider 边界：一次调用、一条事件流、一个终止结果
pub struct AgentExecutionAdapter {
    provider: Arc<dyn AgentProvider>,
    audit: Arc<dyn AuditSink>,
    step_name: String,
    heartbeat_interval: Duration,
}

impl AgentExecutionAdapter {
    pub fn new(
        provider: Arc<dyn AgentProvider>,
        audit: Arc<dyn AuditSink>,
        step_name: impl Into<String>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            provider,
            audit,
            step_name: step_name.into(),
            heartbeat_interval: heartbeat_interval.max(Duration::from_millis(10)),
        }
    }

    /// 执行一次查询；Ok(None) 表示被取消
    pub async fn execute_query<S: Send + Sync>(
        &self,
        session: &SharedSession<S>,
        config: &ExecutionConfig,
        prompt: String,
        emitter: &StreamEmitter,
    ) -> Result<Option<ProviderResult>, StepError> {
        let (session_id, workflow_id, token) = {
            let s = session.read().await;
            (s.id.clone(), s.workflow_id.clone(), s.cancel_token.clone())
        };
        if token.is_cancelled() {
            return Ok(None);
        }

        let agent = &config.agent;
        let request = ExecutionRequest {
            prompt,
            system_prompt: agent.system_prompt.clone(),
            model: agent.model.clone(),
            allowed_tools: agent.allowed_tools.clone(),
            permission_mode: agent.permission_mode,
            output_schema: config.output_schema.clone(),
            thinking_budget_tokens: agent.thinking_budget_tokens,
            resume_session_id: config.resume_session_id.clone(),
            cancel_token: token.clone(),
        };

        record_audit(
            self.audit.as_ref(),
            AuditEvent::new(
                &session_id,
                &workflow_id,
                &self.step_name,
                "provider_call_started",
                serde_json::json!({
                    "model": agent.model,
                    "allowed_tools": agent.allowed_tools,
                    "resume": config.resume_session_id.is_some(),
                }),
            ),
        );

        let started = Instant::now();
        let mut events = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            stream = self.provider.execute(request) => stream?,
        };

        // 扩展推理时不转发部分文本，改发心跳
        let suppress_partial = agent.thinking_budget_tokens.is_some();
        let mut heartbeat =
            tokio::time::interval_at(started + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(session_id = %session_id, "execution cancelled mid-stream");
                    return Ok(None);
                }
                next = events.next() => match next {
                    None => {
                        if token.is_cancelled() {
                            return Ok(None);
                        }
                        return Err(StepError::StreamEnded);
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(ProviderEvent::Result(result))) => {
                        if let Some(provider_session) = &result.session_id {
                            session.write().await.provider_session_id = Some(provider_session.clone());
                        }
                        record_audit(
                            self.audit.as_ref(),
                            AuditEvent::new(
                                &session_id,
                                &workflow_id,
                                &self.step_name,
                                "provider_result",
                                serde_json::json!({
                                    "subtype": result.subtype.as_str(),
                                    "has_structured_output": result.structured_output.is_some(),
                                    "num_turns": result.usage.num_turns,
                                    "total_cost_usd": result.usage.total_cost_usd,
                                    "elapsed_ms": started.elapsed().as_millis() as u64,
                                }),
                            ),
                        );
                        return Ok(Some(result));
                    }
                    Some(Ok(event)) => {
                        self.apply_event(session, &session_id, event, suppress_partial, emitter).await;
                    }
                },
                _ = heartbeat.tick(), if suppress_partial => {
                    emitter.emit(StepStreamMessage::Heartbeat {
                        session_id: session_id.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }

    /// 将单个 provider 事件写入 Session 并转发
    async fn apply_event<S: Send + Sync>(
        &self,
        session: &SharedSession<S>,
        session_id: &str,
        event: ProviderEvent,
        suppress_partial: bool,
        emitter: &StreamEmitter,
    ) {
        let mut s = session.write().await;
        match event {
            ProviderEvent::Init {
                provider_session_id,
                model,
            } => {
                tracing::debug!(session_id, %model, "provider session initialised");
                s.provider_session_id = Some(provider_session_id);
            }
            ProviderEvent::Phase { phase } => {
                tracing::debug!(session_id, provider_phase = %phase, "provider phase changed");
                emitter.emit(StepStreamMessage::ProviderPhase {
                    session_id: session_id.to_string(),
                    phase,
                });
            }
            ProviderEvent::TextDelta { text } => {
                s.streaming_text.push_str(&text);
                if !suppress_partial {
                    emitter.emit(StepStreamMessage::TextDelta {
                        session_id: session_id.to_string(),
                        text,
                    });
                }
            }
            ProviderEvent::ThinkingStart => s.thinking_blocks.push(String::new()),
            ProviderEvent::ThinkingDelta { text } => {
                s.push_thinking(&text);
                if !suppress_partial {
                    emitter.emit(StepStreamMessage::ThinkingDelta {
                        session_id: session_id.to_string(),
                        text,
                    });
                }
            }
            ProviderEvent::ToolStart {
                tool_use_id,
                name,
                input,
            } => {
                tracing::debug!(session_id, tool = %name, "tool started");
                s.start_tool(ActiveTool {
                    tool_use_id: tool_use_id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    started_at: chrono::Utc::now(),
                });
                emitter.emit(StepStreamMessage::ToolStart {
                    session_id: session_id.to_string(),
                    tool_use_id,
                    name,
                    input,
                });
            }
            ProviderEvent::ToolStop {
                tool_use_id,
                is_error,
            } => {
                s.stop_tool(&tool_use_id);
                emitter.emit(StepStreamMessage::ToolStop {
                    session_id: session_id.to_string(),
                    tool_use_id,
                    is_error,
                });
            }
            // 由 execute_query 处理
            ProviderEvent::Result(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryAuditSink;
    use crate::provider::mock::{MockBehavior, ScriptStep, ScriptedProvider};
    use crate::session::StepSessionStore;
    use tokio::sync::mpsc;

    fn exec_config(agent: AgentConfig) -> ExecutionConfig {
        ExecutionConfig {
            agent: Arc::new(agent),
            output_schema: serde_json::json!({"type": "object"}),
            resume_session_id: None,
        }
    }

    fn adapter(provider: Arc<ScriptedProvider>) -> AgentExecutionAdapter {
        AgentExecutionAdapter::new(
            provider,
            Arc::new(MemoryAuditSink::new()),
            "test",
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_events_applied_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![MockBehavior::Script(vec![
            ScriptStep::Event(ProviderEvent::Init {
                provider_session_id: "p-1".to_string(),
                model: "m".to_string(),
            }),
            ScriptStep::Event(ProviderEvent::TextDelta { text: "Hel".to_string() }),
            ScriptStep::Event(ProviderEvent::Phase { phase: "tool_use".to_string() }),
            ScriptStep::Event(ProviderEvent::ToolStart {
                tool_use_id: "t1".to_string(),
                name: "Grep".to_string(),
                input: serde_json::json!({"pattern": "fn"}),
            }),
            ScriptStep::Event(ProviderEvent::ToolStop {
                tool_use_id: "t1".to_string(),
                is_error: false,
            }),
            ScriptStep::Event(ProviderEvent::TextDelta { text: "lo".to_string() }),
            ScriptStep::Event(ProviderEvent::Result(ProviderResult::success(
                serde_json::json!({"ok": true}),
            ))),
        ])]));
        let store: StepSessionStore<()> = StepSessionStore::new();
        let session = store.create("wf-1", ()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = adapter(provider.clone())
            .execute_query(
                &session,
                &exec_config(AgentConfig::new("a", "m").with_allowed_tools(vec!["Grep".into()])),
                "find things".to_string(),
                &StreamEmitter::new(Some(tx)),
            )
            .await
            .unwrap()
            .expect("result");
        assert_eq!(result.structured_output, Some(serde_json::json!({"ok": true})));

        let s = session.read().await;
        assert_eq!(s.streaming_text, "Hello");
        assert!(s.active_tools.is_empty());
        assert_eq!(s.provider_session_id.as_deref(), Some("p-1"));
        drop(s);

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            kinds.push(match msg {
                StepStreamMessage::TextDelta { text, .. } => format!("text:{text}"),
                StepStreamMessage::ProviderPhase { phase, .. } => format!("phase:{phase}"),
                StepStreamMessage::ToolStart { name, .. } => format!("start:{name}"),
                StepStreamMessage::ToolStop { tool_use_id, .. } => format!("stop:{tool_use_id}"),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(kinds, vec!["text:Hel", "phase:tool_use", "start:Grep", "stop:t1", "text:lo"]);

        let request = &provider.requests()[0];
        assert_eq!(request.allowed_tools, vec!["Grep"]);
        assert_eq!(request.prompt, "find things");
    }

    #[tokio::test]
    async fn test_cancel_returns_none() {
        let provider = Arc::new(ScriptedProvider::hanging());
        let store: StepSessionStore<()> = StepSessionStore::new();
        let session = store.create("wf-1", ()).await.unwrap();
        let token = session.read().await.cancel_token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let result = adapter(provider)
            .execute_query(
                &session,
                &exec_config(AgentConfig::new("a", "m")),
                "p".to_string(),
                &StreamEmitter::default(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_when_thinking_budget_set() {
        let provider = Arc::new(ScriptedProvider::new(vec![MockBehavior::Script(vec![
            ScriptStep::Event(ProviderEvent::ThinkingDelta { text: "hmm".to_string() }),
            ScriptStep::Delay(Duration::from_millis(80)),
            ScriptStep::Event(ProviderEvent::Result(ProviderResult::success(
                serde_json::json!({}),
            ))),
        ])]));
        let store: StepSessionStore<()> = StepSessionStore::new();
        let session = store.create("wf-1", ()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        adapter(provider)
            .execute_query(
                &session,
                &exec_config(AgentConfig::new("a", "m").with_thinking_budget(2048)),
                "p".to_string(),
                &StreamEmitter::new(Some(tx)),
            )
            .await
            .unwrap();

        let mut heartbeats = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                StepStreamMessage::Heartbeat { .. } => heartbeats += 1,
                StepStreamMessage::ThinkingDelta { .. } => panic!("partial thinking must be suppressed"),
                _ => {}
            }
        }
        assert!(heartbeats >= 1);
        assert_eq!(session.read().await.thinking_blocks, vec!["hmm"]);
    }

    #[tokio::test]
    async fn test_stream_without_result_is_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![MockBehavior::Script(vec![
            ScriptStep::Event(ProviderEvent::TextDelta { text: "partial".to_string() }),
        ])]));
        let store: StepSessionStore<()> = StepSessionStore::new();
        let session = store.create("wf-1", ()).await.unwrap();

        let err = adapter(provider)
            .execute_query(
                &session,
                &exec_config(AgentConfig::new("a", "m")),
                "p".to_string(),
                &StreamEmitter::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StepError::StreamEnded);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::failing("ECONNREFUSED"));
        let store: StepSessionStore<()> = StepSessionStore::new();
        let session = store.create("wf-1", ()).await.unwrap();

        let err = adapter(provider)
            .execute_query(
                &session,
                &exec_config(AgentConfig::new("a", "m")),
                "p".to_string(),
                &StreamEmitter::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
