//! 细化 step：结合澄清问答，把原始需求改写为可执行的需求描述与验收标准

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::collaborators::AgentConfig;
use crate::output::StructuredOutputValidator;
use crate::provider::ProviderResult;
use crate::step::StepDefinition;

/// 澄清阶段的一问一答
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clarification {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default)]
pub struct RefinementInput {
    pub request: String,
    pub clarifications: Vec<Clarification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefinementDecision {
    Refined,
    CannotRefine,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RefinementOutput {
    pub decision: RefinementDecision,
    #[serde(default)]
    pub refined_request: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// decision 为 CANNOT_REFINE 时必填
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefinementState {
    pub original_request: String,
    pub refined_request: Option<String>,
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefinementOutcome {
    Success {
        refined_request: String,
        acceptance_criteria: Vec<String>,
    },
    CannotRefine { reason: String },
    Error { message: String },
    Timeout { elapsed_seconds: u64 },
    Cancelled { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefinementStep;

impl StepDefinition for RefinementStep {
    type Input = RefinementInput;
    type Output = RefinementOutput;
    type Outcome = RefinementOutcome;
    type WorkingState = RefinementState;

    fn name(&self) -> &'static str {
        "refinement"
    }

    fn create_working_state(&self, input: &RefinementInput) -> RefinementState {
        RefinementState {
            original_request: input.request.clone(),
            ..Default::default()
        }
    }

    fn build_prompt(&self, input: &RefinementInput, _agent: &AgentConfig) -> String {
        let mut prompt = format!(
            "Rewrite the following feature request as a precise, implementable specification.\n\n\
             Original request:\n{}\n",
            input.request.trim()
        );
        if !input.clarifications.is_empty() {
            prompt.push_str("\nClarifications from the user:\n");
            for c in &input.clarifications {
                prompt.push_str(&format!("- Q: {}\n  A: {}\n", c.question, c.answer));
            }
        }
        prompt.push_str(
            "\nRespond with decision REFINED, the refined_request and a list of acceptance_criteria. \
             If the request cannot be turned into something implementable, respond with decision \
             CANNOT_REFINE and a reason.",
        );
        prompt
    }

    fn process_structured_output(
        &self,
        result: &ProviderResult,
        validator: &StructuredOutputValidator,
        session_id: &str,
        state: &mut RefinementState,
    ) -> RefinementOutcome {
        let output: RefinementOutput = match validator.validate(result, session_id) {
            Ok(o) => o,
            Err(e) => return self.error_outcome(e.to_string()),
        };
        let payload = result.structured_output.clone().unwrap_or_default();

        match output.decision {
            RefinementDecision::Refined => {
                if let Err(e) = validator.validate_field(&payload, "refined_request", session_id) {
                    return self.error_outcome(e.to_string());
                }
                let refined_request = output.refined_request.unwrap_or_default();
                state.refined_request = Some(refined_request.clone());
                state.acceptance_criteria = output.acceptance_criteria.clone();
                RefinementOutcome::Success {
                    refined_request,
                    acceptance_criteria: output.acceptance_criteria,
                }
            }
            RefinementDecision::CannotRefine => {
                if let Err(e) = validator.validate_field(&payload, "reason", session_id) {
                    return self.error_outcome(e.to_string());
                }
                RefinementOutcome::CannotRefine {
                    reason: output.reason.unwrap_or_default(),
                }
            }
        }
    }

    fn is_success(&self, outcome: &RefinementOutcome) -> bool {
        matches!(
            outcome,
            RefinementOutcome::Success { .. } | RefinementOutcome::CannotRefine { .. }
        )
    }

    fn error_outcome(&self, message: String) -> RefinementOutcome {
        RefinementOutcome::Error { message }
    }

    fn timeout_outcome(&self, elapsed_seconds: u64) -> RefinementOutcome {
        RefinementOutcome::Timeout { elapsed_seconds }
    }

    fn cancelled_outcome(&self, reason: &str) -> RefinementOutcome {
        RefinementOutcome::Cancelled {
            message: reason.to_string(),
        }
    }
}
