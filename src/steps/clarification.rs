//! 澄清 step：针对模糊的需求提出澄清问题，或判断无需澄清直接跳过
//!
//! 失败时调用方可以手动跳过此 step（skip fallback）。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::collaborators::AgentConfig;
use crate::output::StructuredOutputValidator;
use crate::provider::ProviderResult;
use crate::step::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct ClarificationInput {
    pub request: String,
    /// 可选的项目背景（README 摘要等）
    pub project_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClarifyingQuestion {
    pub question: String,
    /// 候选答案，可为空
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClarificationDecision {
    Questions,
    SkipClarification,
}

/// Agent 返回的结构化输出
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClarificationOutput {
    pub decision: ClarificationDecision,
    #[serde(default)]
    pub questions: Vec<ClarifyingQuestion>,
    /// decision 为 SKIP_CLARIFICATION 时必填
    #[serde(default)]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClarificationState {
    pub request: String,
    pub questions: Vec<ClarifyingQuestion>,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClarificationOutcome {
    Questions { questions: Vec<ClarifyingQuestion> },
    SkipClarification { reason: String },
    Error { message: String },
    Timeout { elapsed_seconds: u64 },
    Cancelled { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClarificationStep;

impl StepDefinition for ClarificationStep {
    type Input = ClarificationInput;
    type Output = ClarificationOutput;
    type Outcome = ClarificationOutcome;
    type WorkingState = ClarificationState;

    fn name(&self) -> &'static str {
        "clarification"
    }

    fn supports_skip_fallback(&self) -> bool {
        true
    }

    fn create_working_state(&self, input: &ClarificationInput) -> ClarificationState {
        ClarificationState {
            request: input.request.clone(),
            ..Default::default()
        }
    }

    fn build_prompt(&self, input: &ClarificationInput, _agent: &AgentConfig) -> String {
        let mut prompt = format!(
            "Review the following feature request and decide whether it is clear enough to implement.\n\n\
             Request:\n{}\n",
            input.request.trim()
        );
        if let Some(ctx) = input.project_context.as_deref().filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\nProject context:\n{}\n", ctx.trim()));
        }
        prompt.push_str(
            "\nIf important details are ambiguous, respond with decision QUESTIONS and a short list of \
             clarifying questions. If the request is already clear, respond with decision \
             SKIP_CLARIFICATION and explain why in skip_reason.",
        );
        prompt
    }

    fn process_structured_output(
        &self,
        result: &ProviderResult,
        validator: &StructuredOutputValidator,
        session_id: &str,
        state: &mut ClarificationState,
    ) -> ClarificationOutcome {
        let output: ClarificationOutput = match validator.validate(result, session_id) {
            Ok(o) => o,
            Err(e) => return self.error_outcome(e.to_string()),
        };
        let payload = result.structured_output.clone().unwrap_or_default();

        match output.decision {
            ClarificationDecision::Questions => {
                if let Err(e) = validator.validate_field(&payload, "questions", session_id) {
                    return self.error_outcome(e.to_string());
                }
                state.questions = output.questions.clone();
                ClarificationOutcome::Questions {
                    questions: output.questions,
                }
            }
            ClarificationDecision::SkipClarification => {
                if let Err(e) = validator.validate_field(&payload, "skip_reason", session_id) {
                    return self.error_outcome(e.to_string());
                }
                let reason = output.skip_reason.unwrap_or_default();
                state.skip_reason = Some(reason.clone());
                ClarificationOutcome::SkipClarification { reason }
            }
        }
    }

    fn is_success(&self, outcome: &ClarificationOutcome) -> bool {
        matches!(
            outcome,
            ClarificationOutcome::Questions { .. } | ClarificationOutcome::SkipClarification { .. }
        )
    }

    fn error_outcome(&self, message: String) -> ClarificationOutcome {
        ClarificationOutcome::Error { message }
    }

    fn timeout_outcome(&self, elapsed_seconds: u64) -> ClarificationOutcome {
        ClarificationOutcome::Timeout { elapsed_seconds }
    }

    fn cancelled_outcome(&self, reason: &str) -> ClarificationOutcome {
        ClarificationOutcome::Cancelled {
            message: reason.to_string(),
        }
    }
}
