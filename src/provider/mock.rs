//! 脚本化 Mock Provider（用于测试，无需真实 agent）
//!
//! 每次 execute 依次取出一个行为；只剩最后一个时重复使用。
//! 行为可以是事件脚本（含延迟）、永不结束、直接失败或流中途失败。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::StepError;
use crate::provider::{
    AgentProvider, ExecutionRequest, ProviderEvent, ProviderEventStream, ProviderResult,
};

/// 脚本中的一步
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Event(ProviderEvent),
    Delay(Duration),
    /// 流中途出错
    Error(String),
}

/// 单次调用的行为
#[derive(Clone, Debug)]
pub enum MockBehavior {
    Script(Vec<ScriptStep>),
    /// 永不产生事件（用于超时测试）
    Hang,
    /// execute 直接返回错误
    Fail(String),
}

/// 脚本化 provider
#[derive(Debug)]
pub struct ScriptedProvider {
    behaviors: Mutex<VecDeque<MockBehavior>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedProvider {
    pub fn new(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 立即返回成功结果
    pub fn succeeding(output: serde_json::Value) -> Self {
        Self::new(vec![MockBehavior::Script(vec![
            ScriptStep::Event(ProviderEvent::Init {
                provider_session_id: "mock-session".to_string(),
                model: "mock".to_string(),
            }),
            ScriptStep::Event(ProviderEvent::Result(
                ProviderResult::success(output).with_session_id("mock-session"),
            )),
        ])])
    }

    pub fn hanging() -> Self {
        Self::new(vec![MockBehavior::Hang])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![MockBehavior::Fail(message.into())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut behaviors = self.behaviors.lock().unwrap_or_else(PoisonError::into_inner);
        if behaviors.len() > 1 {
            behaviors.pop_front().unwrap_or(MockBehavior::Hang)
        } else {
            behaviors.front().cloned().unwrap_or(MockBehavior::Hang)
        }
    }
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderEventStream, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let token = request.cancel_token.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        match self.next_behavior() {
            MockBehavior::Fail(msg) => Err(StepError::Provider(msg)),
            MockBehavior::Hang => Ok(Box::pin(stream::pending())),
            MockBehavior::Script(steps) => {
                let steps: VecDeque<ScriptStep> = steps.into();
                let events = stream::unfold((steps, token), |(mut steps, token)| async move {
                    loop {
                        if token.is_cancelled() {
                            return None;
                        }
                        match steps.pop_front()? {
                            ScriptStep::Delay(d) => {
                                tokio::select! {
                                    _ = tokio::time::sleep(d) => {}
                                    _ = token.cancelled() => return None,
                                }
                            }
                            ScriptStep::Event(ev) => return Some((Ok(ev), (steps, token))),
                            ScriptStep::Error(msg) => {
                                return Some((Err(StepError::Provider(msg)), (steps, token)))
                            }
                        }
                    }
                });
                Ok(Box::pin(events))
            }
        }
    }
}
