//! Step 编排器：所有 step 共享的生命周期
//!
//! - start：创建会话 → 加载 AgentConfig → 执行（与超时竞速）→ 校验结构化输出 → 组装 outcome → 注销会话
//! - cancel：原子移除会话并触发取消令牌，清零重试计数
//! - retry：计数 +1（超过上限后不再增长），超过上限直接返回 max-retries outcome；否则指数退避后重新 start
//! - submit_feedback / approve：gate step 的评审循环（awaiting_review ⇄ regenerating），
//!   重新生成失败时恢复上一版工作状态并回到 awaiting_review
//!
//! 错误、超时、取消在公开边界一律转为 outcome，不向调用方抛出。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    record_audit, AgentConfigLoader, AuditEvent, AuditSink, PauseBehaviorResolver,
    StaticPauseResolver, TracingAuditSink,
};
use crate::config::{AppConfig, OrchestratorSettings};
use crate::core::{
    calculate_backoff_delay, create_timeout_future, RetryTracker, SessionState, StepError,
    StepPhase,
};
use crate::events::{StreamEmitter, StreamSender};
use crate::output::{ExecutionSummary, OutcomeComposer, OutcomeWithPause, StructuredOutputValidator};
use crate::provider::{AgentExecutionAdapter, AgentProvider, ExecutionConfig, ProviderResult};
use crate::session::{SharedSession, StepSessionStore};
use crate::step::StepDefinition;

/// 编排器依赖的外部协作者
#[derive(Clone)]
pub struct StepServices {
    pub provider: Arc<dyn AgentProvider>,
    pub config_loader: Arc<dyn AgentConfigLoader>,
    pub pause_resolver: Arc<dyn PauseBehaviorResolver>,
    pub audit: Arc<dyn AuditSink>,
}

impl StepServices {
    /// 默认 auto_pause 策略，审计写入 tracing
    pub fn new(provider: Arc<dyn AgentProvider>, config_loader: Arc<dyn AgentConfigLoader>) -> Self {
        Self {
            provider,
            config_loader,
            pause_resolver: Arc::new(StaticPauseResolver::default()),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_pause_resolver(mut self, resolver: Arc<dyn PauseBehaviorResolver>) -> Self {
        self.pause_resolver = resolver;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

/// start / retry 的参数
#[derive(Debug, Clone)]
pub struct StartOptions<I> {
    pub workflow_id: String,
    pub agent_id: String,
    /// 未设置时使用 OrchestratorSettings::default_timeout_secs
    pub timeout_secs: Option<u64>,
    pub input: I,
}

impl<I> StartOptions<I> {
    pub fn new(workflow_id: impl Into<String>, agent_id: impl Into<String>, input: I) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            agent_id: agent_id.into(),
            timeout_secs: None,
            input,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// 单次执行（首次或评审后重新生成）
struct Attempt {
    session_id: String,
    workflow_id: String,
    config: ExecutionConfig,
    prompt: String,
    timeout_secs: u64,
}

enum Race {
    Finished(Result<Option<ProviderResult>, StepError>),
    TimedOut(u64),
}

/// 按 StepDefinition 参数化的通用编排引擎
pub struct StepOrchestrator<D: StepDefinition> {
    step: D,
    sessions: StepSessionStore<D::WorkingState>,
    retries: RetryTracker,
    adapter: AgentExecutionAdapter,
    validator: StructuredOutputValidator,
    composer: OutcomeComposer,
    config_loader: Arc<dyn AgentConfigLoader>,
    audit: Arc<dyn AuditSink>,
    settings: OrchestratorSettings,
}

impl<D: StepDefinition> StepOrchestrator<D> {
    pub fn new(step: D, services: StepServices, settings: OrchestratorSettings) -> Self {
        let name = step.name();
        Self {
            adapter: AgentExecutionAdapter::new(
                services.provider,
                services.audit.clone(),
                name,
                settings.heartbeat_interval,
            ),
            validator: StructuredOutputValidator::new(services.audit.clone(), name),
            composer: OutcomeComposer::new(services.pause_resolver, step.is_gate()),
            sessions: StepSessionStore::new(),
            retries: RetryTracker::new(settings.max_retries),
            config_loader: services.config_loader,
            audit: services.audit,
            settings,
            step,
        }
    }

    /// 使用 [steps.<name>] 覆盖后的设置
    pub fn from_config(step: D, services: StepServices, config: &AppConfig) -> Self {
        let settings = config.settings_for(step.name());
        Self::new(step, services, settings)
    }

    pub fn step(&self) -> &D {
        &self.step
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn retry_count(&self, workflow_id: &str) -> u32 {
        self.retries.get(workflow_id)
    }

    pub async fn has_active_session(&self, workflow_id: &str) -> bool {
        self.sessions.contains(workflow_id).await
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.active_count().await
    }

    /// 启动一次 step 执行
    pub async fn start(
        &self,
        options: StartOptions<D::Input>,
        on_stream: Option<StreamSender>,
    ) -> OutcomeWithPause<D::Outcome> {
        let emitter = StreamEmitter::new(on_stream);
        let StartOptions {
            workflow_id,
            agent_id,
            timeout_secs,
            input,
        } = options;

        let working_state = self.step.create_working_state(&input);
        let session = match self.sessions.create(&workflow_id, working_state).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(step = self.step.name(), %workflow_id, "start rejected: {e}");
                return self.rejected(&workflow_id, e.to_string());
            }
        };
        let (session_id, token) = {
            let s = session.read().await;
            (s.id.clone(), s.cancel_token.clone())
        };
        tracing::info!(step = self.step.name(), %workflow_id, %session_id, %agent_id, "step started");
        self.audit_event(
            &session_id,
            &workflow_id,
            "step_started",
            serde_json::json!({ "agent_id": agent_id, "timeout_secs": timeout_secs }),
        );

        self.set_phase(&session, StepPhase::LoadingAgent, &emitter).await;
        let agent = match self
            .config_loader
            .load_agent_config(&workflow_id, &agent_id)
            .await
        {
            Ok(agent) => Arc::new(agent),
            Err(e) => {
                tracing::error!(step = self.step.name(), %workflow_id, %session_id, "agent config load failed: {e}");
                self.finish(&session, StepPhase::Error, &emitter).await;
                self.audit_event(
                    &session_id,
                    &workflow_id,
                    "step_failed",
                    serde_json::json!({ "error": e.to_string(), "class": format!("{:?}", e.class()) }),
                );
                return self.composer.build_error_outcome_with_retry(
                    self.step.error_outcome(e.to_string()),
                    self.retries.get(&workflow_id),
                    self.skip_fallback(),
                    Some(format!("{:?}: {e}", e.class())),
                );
            }
        };

        if token.is_cancelled() {
            return self.cancelled(&session, &workflow_id, &emitter).await;
        }

        session.write().await.agent_config = Some(agent.clone());
        self.set_phase(&session, StepPhase::Executing, &emitter).await;

        let prompt = self.step.build_prompt(&input, &agent);
        let attempt = Attempt {
            session_id,
            workflow_id,
            config: ExecutionConfig {
                agent,
                output_schema: self.step.output_schema(),
                resume_session_id: None,
            },
            prompt,
            timeout_secs: timeout_secs.unwrap_or(self.settings.default_timeout_secs),
        };
        self.run_attempt(&session, attempt, None, &emitter).await
    }

    /// 取消该 workflow 的活跃会话；没有会话时返回 not-found outcome
    pub async fn cancel(&self, workflow_id: &str, on_stream: Option<StreamSender>) -> D::Outcome {
        let emitter = StreamEmitter::new(on_stream);
        let Some(session) = self.sessions.remove(workflow_id).await else {
            tracing::info!(step = self.step.name(), workflow_id, "cancel requested but no active session");
            return self.step.not_found_outcome(workflow_id);
        };

        let session_id = {
            let mut s = session.write().await;
            s.clear_timeout();
            s.cancel_token.cancel();
            s.phase = StepPhase::Cancelled;
            s.id.clone()
        };
        emitter.phase_change(&session_id, workflow_id, StepPhase::Cancelled);
        self.retries.clear(workflow_id);

        tracing::info!(step = self.step.name(), workflow_id, %session_id, "step cancelled");
        self.audit_event(&session_id, workflow_id, "step_cancelled", serde_json::json!({}));
        self.step.cancelled_outcome("Cancelled by user")
    }

    /// 重试：超过上限时不执行；否则退避后重新 start
    pub async fn retry(
        &self,
        options: StartOptions<D::Input>,
        on_stream: Option<StreamSender>,
    ) -> OutcomeWithPause<D::Outcome> {
        let workflow_id = options.workflow_id.clone();
        let attempt = self.retries.increment(&workflow_id);
        let max = self.retries.max_retries();

        if self.retries.is_limit_reached(&workflow_id) {
            tracing::warn!(step = self.step.name(), %workflow_id, attempt, max, "retry limit reached");
            self.audit_event(
                "",
                &workflow_id,
                "max_retries_reached",
                serde_json::json!({ "attempt": attempt, "max_retries": max }),
            );
            return self.composer.build_error_outcome_with_retry(
                self.step.max_retries_outcome(max),
                attempt,
                self.skip_fallback(),
                None,
            );
        }

        let delay = calculate_backoff_delay(attempt, self.settings.base_delay);
        tracing::info!(
            step = self.step.name(),
            %workflow_id,
            attempt,
            max,
            delay_ms = delay.as_millis() as u64,
            "retrying step after backoff"
        );
        tokio::time::sleep(delay).await;

        // 被重试取代的旧会话（如仍在 awaiting_review）
        if let Some(stale) = self.sessions.remove(&workflow_id).await {
            let mut s = stale.write().await;
            s.clear_timeout();
            s.cancel_token.cancel();
            s.phase = StepPhase::Cancelled;
            tracing::debug!(session_id = %s.id, "session superseded by retry");
        }

        self.start(options, on_stream).await
    }

    /// 活跃会话的只读快照
    pub async fn get_state(&self, workflow_id: &str) -> Option<SessionState<D::WorkingState>> {
        let session = self.sessions.get(workflow_id).await?;
        let s = session.read().await;
        Some(s.snapshot_with(self.step.extract_state(&s.working_state)))
    }

    /// 评审反馈：awaiting_review → regenerating → processing_response → awaiting_review
    pub async fn submit_feedback(
        &self,
        workflow_id: &str,
        feedback: &str,
        timeout_secs: Option<u64>,
        on_stream: Option<StreamSender>,
    ) -> OutcomeWithPause<D::Outcome> {
        let emitter = StreamEmitter::new(on_stream);
        let Some(session) = self.sessions.get(workflow_id).await else {
            return self.composer.build_error_outcome_with_retry(
                self.step.not_found_outcome(workflow_id),
                self.retries.get(workflow_id),
                self.skip_fallback(),
                None,
            );
        };

        // 检查与切换阶段在同一把写锁内完成，并发反馈只有一个生效
        let prepared = {
            let mut s = session.write().await;
            if s.phase != StepPhase::AwaitingReview {
                Err(StepError::InvalidPhase(format!(
                    "cannot submit feedback while session is {}",
                    s.phase
                )))
            } else if let Some(agent) = s.agent_config.clone() {
                let previous = s.working_state.clone();
                match self.step.build_feedback_prompt(&mut s.working_state, feedback) {
                    Some(prompt) => {
                        s.phase = StepPhase::Regenerating;
                        s.reset_stream();
                        Ok((s.id.clone(), prompt, agent, s.provider_session_id.clone(), previous))
                    }
                    None => Err(StepError::InvalidPhase(format!(
                        "{} step does not support review feedback",
                        self.step.name()
                    ))),
                }
            } else {
                Err(StepError::InvalidPhase(
                    "session has no loaded agent config".to_string(),
                ))
            }
        };
        let (session_id, prompt, agent, resume_session_id, previous) = match prepared {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(step = self.step.name(), workflow_id, "feedback rejected: {e}");
                return self.rejected(workflow_id, e.to_string());
            }
        };

        emitter.phase_change(&session_id, workflow_id, StepPhase::Regenerating);
        tracing::info!(step = self.step.name(), workflow_id, %session_id, "regenerating with review feedback");
        self.audit_event(
            &session_id,
            workflow_id,
            "feedback_submitted",
            serde_json::json!({ "feedback_chars": feedback.chars().count() }),
        );

        let attempt = Attempt {
            session_id,
            workflow_id: workflow_id.to_string(),
            config: ExecutionConfig {
                agent,
                output_schema: self.step.output_schema(),
                resume_session_id,
            },
            prompt,
            timeout_secs: timeout_secs.unwrap_or(self.settings.default_timeout_secs),
        };
        self.run_attempt(&session, attempt, Some(previous), &emitter).await
    }

    /// 评审通过：awaiting_review → complete，注销会话
    pub async fn approve(
        &self,
        workflow_id: &str,
        on_stream: Option<StreamSender>,
    ) -> OutcomeWithPause<D::Outcome> {
        let emitter = StreamEmitter::new(on_stream);
        let Some(session) = self.sessions.get(workflow_id).await else {
            return self.composer.build_error_outcome_with_retry(
                self.step.not_found_outcome(workflow_id),
                self.retries.get(workflow_id),
                self.skip_fallback(),
                None,
            );
        };

        let approved = {
            let mut s = session.write().await;
            if s.phase != StepPhase::AwaitingReview {
                Err(StepError::InvalidPhase(format!(
                    "cannot approve while session is {}",
                    s.phase
                )))
            } else {
                match self.step.approved_outcome(&s.working_state) {
                    Some(outcome) => {
                        s.phase = StepPhase::Complete;
                        s.clear_timeout();
                        Ok((s.id.clone(), s.provider_session_id.clone(), outcome))
                    }
                    None => Err(StepError::InvalidPhase(format!(
                        "{} step does not support approval",
                        self.step.name()
                    ))),
                }
            }
        };
        let (session_id, provider_session_id, outcome) = match approved {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(step = self.step.name(), workflow_id, "approval rejected: {e}");
                return self.rejected(workflow_id, e.to_string());
            }
        };

        emitter.phase_change(&session_id, workflow_id, StepPhase::Complete);
        self.sessions.remove_if_current(workflow_id, &session_id).await;
        self.retries.clear(workflow_id);
        tracing::info!(step = self.step.name(), workflow_id, %session_id, "step approved");
        self.audit_event(&session_id, workflow_id, "step_approved", serde_json::json!({}));

        let summary = ExecutionSummary {
            provider_session_id,
            usage: None,
        };
        self.composer
            .build_outcome_with_pause_info(outcome, workflow_id, &summary, self.skip_fallback())
            .await
    }

    /// 执行与超时竞速，并把结果转为 outcome
    ///
    /// `review_state` 为评审重新生成前的工作状态；失败时据此回到 awaiting_review
    async fn run_attempt(
        &self,
        session: &SharedSession<D::WorkingState>,
        attempt: Attempt,
        review_state: Option<D::WorkingState>,
        emitter: &StreamEmitter,
    ) -> OutcomeWithPause<D::Outcome> {
        let Attempt {
            session_id,
            workflow_id,
            config,
            prompt,
            timeout_secs,
        } = attempt;

        let token = session.read().await.cancel_token.clone();
        let (timeout_future, timeout_handle) = create_timeout_future(
            Duration::from_secs(timeout_secs),
            token.clone(),
            move || timeout_secs,
        );
        session.write().await.timeout = Some(timeout_handle.clone());

        let raced = tokio::select! {
            result = self.adapter.execute_query(session, &config, prompt, emitter) => Race::Finished(result),
            elapsed = timeout_future => Race::TimedOut(elapsed),
        };
        timeout_handle.cleanup();
        session.write().await.timeout = None;

        match raced {
            Race::TimedOut(elapsed_seconds) => {
                token.cancel();
                tracing::warn!(
                    step = self.step.name(),
                    %workflow_id,
                    %session_id,
                    elapsed_seconds,
                    "step execution timed out"
                );
                self.settle(session, StepPhase::Timeout, review_state, emitter).await;
                self.audit_event(
                    &session_id,
                    &workflow_id,
                    "step_timeout",
                    serde_json::json!({ "elapsed_seconds": elapsed_seconds }),
                );
                self.composer.build_outcome_with_retry(
                    self.step.timeout_outcome(elapsed_seconds),
                    self.retries.get(&workflow_id),
                    None,
                    self.skip_fallback(),
                )
            }
            Race::Finished(Ok(None)) => self.cancelled(session, &workflow_id, emitter).await,
            // 结果与取消同时到达时以取消为准
            Race::Finished(Ok(Some(_))) if token.is_cancelled() => {
                self.cancelled(session, &workflow_id, emitter).await
            }
            Race::Finished(Ok(Some(result))) => {
                self.complete(session, &session_id, &workflow_id, result, review_state, emitter)
                    .await
            }
            Race::Finished(Err(e)) => {
                if e.is_transient() {
                    tracing::warn!(step = self.step.name(), %workflow_id, %session_id, "transient execution failure: {e}");
                } else {
                    tracing::error!(step = self.step.name(), %workflow_id, %session_id, "execution failed: {e}");
                }
                self.settle(session, StepPhase::Error, review_state, emitter).await;
                self.audit_event(
                    &session_id,
                    &workflow_id,
                    "step_failed",
                    serde_json::json!({ "error": e.to_string(), "class": format!("{:?}", e.class()) }),
                );
                self.composer.build_error_outcome_with_retry(
                    self.step.error_outcome(e.to_string()),
                    self.retries.get(&workflow_id),
                    self.skip_fallback(),
                    Some(format!("{:?}: {e}", e.class())),
                )
            }
        }
    }

    /// 处理 provider 终止结果
    async fn complete(
        &self,
        session: &SharedSession<D::WorkingState>,
        session_id: &str,
        workflow_id: &str,
        result: ProviderResult,
        review_state: Option<D::WorkingState>,
        emitter: &StreamEmitter,
    ) -> OutcomeWithPause<D::Outcome> {
        self.set_phase(session, StepPhase::ProcessingResponse, emitter).await;

        let mut summary = ExecutionSummary::from(&result);
        let outcome = {
            let mut guard = session.write().await;
            let s = &mut *guard;
            // 结果未带会话令牌时沿用 Init 事件记录的
            if summary.provider_session_id.is_none() {
                summary.provider_session_id = s.provider_session_id.clone();
            }
            self.step.process_structured_output(
                &result,
                &self.validator,
                &s.id,
                &mut s.working_state,
            )
        };
        let phase = self.step.terminal_phase(&outcome);
        let success = self.step.is_success(&outcome);

        if phase.is_terminal() {
            let review_state = review_state.filter(|_| !success);
            self.settle(session, phase, review_state, emitter).await;
        } else {
            self.set_phase(session, phase, emitter).await;
        }

        self.audit_event(
            session_id,
            workflow_id,
            "step_completed",
            serde_json::json!({
                "outcome": outcome_tag(&outcome),
                "phase": phase.as_str(),
                "num_turns": result.usage.num_turns,
                "total_cost_usd": result.usage.total_cost_usd,
            }),
        );

        if success {
            self.retries.clear(workflow_id);
            self.composer
                .build_outcome_with_pause_info(outcome, workflow_id, &summary, self.skip_fallback())
                .await
        } else {
            self.composer.build_outcome_with_retry(
                outcome,
                self.retries.get(workflow_id),
                Some(&summary),
                self.skip_fallback(),
            )
        }
    }

    async fn cancelled(
        &self,
        session: &SharedSession<D::WorkingState>,
        workflow_id: &str,
        emitter: &StreamEmitter,
    ) -> OutcomeWithPause<D::Outcome> {
        self.finish(session, StepPhase::Cancelled, emitter).await;
        self.composer.build_outcome_with_retry(
            self.step.cancelled_outcome("Execution cancelled"),
            self.retries.get(workflow_id),
            None,
            self.skip_fallback(),
        )
    }

    /// 非终止阶段切换；会话已进入终止态（如被 cancel）时忽略
    async fn set_phase(
        &self,
        session: &SharedSession<D::WorkingState>,
        phase: StepPhase,
        emitter: &StreamEmitter,
    ) {
        let ids = {
            let mut s = session.write().await;
            if s.phase.is_terminal() {
                None
            } else {
                s.phase = phase;
                Some((s.id.clone(), s.workflow_id.clone()))
            }
        };
        if let Some((session_id, workflow_id)) = ids {
            tracing::debug!(step = self.step.name(), %workflow_id, %session_id, %phase, "phase changed");
            emitter.phase_change(&session_id, &workflow_id, phase);
        }
    }

    /// 进入终止阶段并注销会话（仅当注册的仍是本会话）
    async fn finish(
        &self,
        session: &SharedSession<D::WorkingState>,
        phase: StepPhase,
        emitter: &StreamEmitter,
    ) {
        let (session_id, workflow_id, changed) = {
            let mut s = session.write().await;
            s.clear_timeout();
            let changed = !s.phase.is_terminal();
            if changed {
                s.phase = phase;
            }
            (s.id.clone(), s.workflow_id.clone(), changed)
        };
        if changed {
            tracing::debug!(step = self.step.name(), %workflow_id, %session_id, %phase, "phase changed");
            emitter.phase_change(&session_id, &workflow_id, phase);
        }
        self.sessions
            .remove_if_current(&workflow_id, &session_id)
            .await;
    }

    /// 失败收尾：评审重新生成失败时恢复上一版工作状态并回到 awaiting_review，否则 finish
    async fn settle(
        &self,
        session: &SharedSession<D::WorkingState>,
        phase: StepPhase,
        review_state: Option<D::WorkingState>,
        emitter: &StreamEmitter,
    ) {
        if let Some(previous) = review_state {
            if self.back_to_review(session, previous, phase, emitter).await {
                return;
            }
        }
        self.finish(session, phase, emitter).await;
    }

    /// 已被 cancel / retry 取代（阶段为终止态）时返回 false
    async fn back_to_review(
        &self,
        session: &SharedSession<D::WorkingState>,
        previous: D::WorkingState,
        failed: StepPhase,
        emitter: &StreamEmitter,
    ) -> bool {
        let (session_id, workflow_id) = {
            let mut s = session.write().await;
            if s.phase.is_terminal() {
                return false;
            }
            s.clear_timeout();
            s.working_state = previous;
            s.phase = StepPhase::AwaitingReview;
            // 超时会触发本会话的令牌，保留会话就需要新令牌
            if s.cancel_token.is_cancelled() {
                s.cancel_token = CancellationToken::new();
            }
            (s.id.clone(), s.workflow_id.clone())
        };
        tracing::warn!(
            step = self.step.name(),
            %workflow_id,
            %session_id,
            %failed,
            "regeneration failed, previous draft kept for review"
        );
        emitter.phase_change(&session_id, &workflow_id, StepPhase::AwaitingReview);
        true
    }

    /// 未进入执行就被拒绝的请求（会话已存在、阶段不符等）
    fn rejected(&self, workflow_id: &str, message: String) -> OutcomeWithPause<D::Outcome> {
        self.composer.build_error_outcome_with_retry(
            self.step.error_outcome(message),
            self.retries.get(workflow_id),
            self.skip_fallback(),
            None,
        )
    }

    fn skip_fallback(&self) -> Option<bool> {
        self.step.supports_skip_fallback().then_some(true)
    }

    fn audit_event(&self, session_id: &str, workflow_id: &str, event: &str, data: serde_json::Value) {
        record_audit(
            self.audit.as_ref(),
            AuditEvent::new(session_id, workflow_id, self.step.name(), event, data),
        );
    }
}

/// outcome 的 type 标签（用于审计）
fn outcome_tag<O: serde::Serialize>(outcome: &O) -> String {
    serde_json::to_value(outcome)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_default()
}
