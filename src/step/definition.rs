//! Step 扩展点
//!
//! 每种 step（澄清、细化、发现、规划）实现 StepDefinition：提供 prompt、输出类型、
//! 结构化输出解释、工作状态以及各类 outcome 构造；通用生命周期由 StepOrchestrator 负责。

use std::fmt::Debug;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::collaborators::AgentConfig;
use crate::core::StepPhase;
use crate::output::{output_schema, StructuredOutputValidator};
use crate::provider::ProviderResult;

pub trait StepDefinition: Send + Sync + 'static {
    /// start 时传入的 step 输入
    type Input: Clone + Send + Sync + 'static;
    /// 期望的结构化输出（生成 schema 并用于反序列化）
    type Output: DeserializeOwned + JsonSchema;
    /// step 自己的 outcome 联合类型
    type Outcome: Clone + Debug + Serialize + Send + Sync + 'static;
    /// Session 中的 step 工作状态
    type WorkingState: Clone + Debug + Serialize + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// gate step 在 gates_only 策略下也会暂停
    fn is_gate(&self) -> bool {
        false
    }

    /// 失败时调用方是否可手动跳过此 step
    fn supports_skip_fallback(&self) -> bool {
        false
    }

    fn output_schema(&self) -> serde_json::Value {
        output_schema::<Self::Output>()
    }

    fn create_working_state(&self, input: &Self::Input) -> Self::WorkingState;

    fn build_prompt(&self, input: &Self::Input, agent: &AgentConfig) -> String;

    /// 解释 provider 结果；应通过 validator 校验并更新工作状态
    fn process_structured_output(
        &self,
        result: &ProviderResult,
        validator: &StructuredOutputValidator,
        session_id: &str,
        state: &mut Self::WorkingState,
    ) -> Self::Outcome;

    /// getState 暴露给外部的工作状态
    fn extract_state(&self, state: &Self::WorkingState) -> Self::WorkingState {
        state.clone()
    }

    /// 成功类 outcome（含 step 自定义的替代成功标签）会清零重试计数并按策略暂停
    fn is_success(&self, outcome: &Self::Outcome) -> bool;

    /// 处理结果后进入的阶段；返回非终止态（如 AwaitingReview）时会话保持注册
    fn terminal_phase(&self, outcome: &Self::Outcome) -> StepPhase {
        if self.is_success(outcome) {
            StepPhase::Complete
        } else {
            StepPhase::Error
        }
    }

    fn error_outcome(&self, message: String) -> Self::Outcome;

    fn timeout_outcome(&self, elapsed_seconds: u64) -> Self::Outcome;

    fn cancelled_outcome(&self, reason: &str) -> Self::Outcome;

    fn not_found_outcome(&self, workflow_id: &str) -> Self::Outcome {
        self.error_outcome(format!(
            "No active {} session found for workflow {workflow_id}",
            self.name()
        ))
    }

    fn max_retries_outcome(&self, max_retries: u32) -> Self::Outcome {
        self.error_outcome(format!(
            "Maximum retry attempts ({max_retries}) reached for {} step",
            self.name()
        ))
    }

    /// 评审反馈后重新生成的 prompt（可顺带记录反馈历史）；None 表示不支持评审循环
    fn build_feedback_prompt(
        &self,
        _state: &mut Self::WorkingState,
        _feedback: &str,
    ) -> Option<String> {
        None
    }

    /// 评审通过时的 outcome；None 表示不支持
    fn approved_outcome(&self, _state: &Self::WorkingState) -> Option<Self::Outcome> {
        None
    }
}
