//! 规划 step（gate）：生成实现计划草案后进入 awaiting_review，
//! 用户可多次提交反馈重新生成，或直接批准。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::collaborators::AgentConfig;
use crate::core::StepPhase;
use crate::output::StructuredOutputValidator;
use crate::provider::ProviderResult;
use crate::step::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct PlanningInput {
    pub request: String,
    /// 发现 step 找到的相关文件
    pub relevant_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Agent 返回的计划草案（也是结构化输出本身）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    pub summary: String,
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanningState {
    pub request: String,
    pub relevant_files: Vec<String>,
    pub draft: Option<PlanDraft>,
    /// 已生成的草案版本数
    pub revision: u32,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanningOutcome {
    PlanReady { plan: PlanDraft, revision: u32 },
    Approved { plan: PlanDraft },
    Error { message: String },
    Timeout { elapsed_seconds: u64 },
    Cancelled { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningStep;

impl StepDefinition for PlanningStep {
    type Input = PlanningInput;
    type Output = PlanDraft;
    type Outcome = PlanningOutcome;
    type WorkingState = PlanningState;

    fn name(&self) -> &'static str {
        "planning"
    }

    fn is_gate(&self) -> bool {
        true
    }

    fn create_working_state(&self, input: &PlanningInput) -> PlanningState {
        PlanningState {
            request: input.request.clone(),
            relevant_files: input.relevant_files.clone(),
            ..Default::default()
        }
    }

    fn build_prompt(&self, input: &PlanningInput, _agent: &AgentConfig) -> String {
        let mut prompt = format!(
            "Write an implementation plan for the following request.\n\nRequest:\n{}\n",
            input.request.trim()
        );
        if !input.relevant_files.is_empty() {
            prompt.push_str("\nRelevant files:\n");
            for f in &input.relevant_files {
                prompt.push_str(&format!("- {f}\n"));
            }
        }
        prompt.push_str(
            "\nReturn a short summary and an ordered list of tasks. Each task has a title, a description \
             and the files it touches.",
        );
        prompt
    }

    fn process_structured_output(
        &self,
        result: &ProviderResult,
        validator: &StructuredOutputValidator,
        session_id: &str,
        state: &mut PlanningState,
    ) -> PlanningOutcome {
        let plan: PlanDraft = match validator.validate(result, session_id) {
            Ok(p) => p,
            Err(e) => return self.error_outcome(e.to_string()),
        };
        let payload = result.structured_output.clone().unwrap_or_default();
        for field in ["summary", "tasks"] {
            if let Err(e) = validator.validate_field(&payload, field, session_id) {
                return self.error_outcome(e.to_string());
            }
        }

        state.revision += 1;
        state.draft = Some(plan.clone());
        PlanningOutcome::PlanReady {
            plan,
            revision: state.revision,
        }
    }

    fn is_success(&self, outcome: &PlanningOutcome) -> bool {
        matches!(
            outcome,
            PlanningOutcome::PlanReady { .. } | PlanningOutcome::Approved { .. }
        )
    }

    /// 草案完成后等待评审，会话保持注册
    fn terminal_phase(&self, outcome: &PlanningOutcome) -> StepPhase {
        match outcome {
            PlanningOutcome::PlanReady { .. } => StepPhase::AwaitingReview,
            PlanningOutcome::Approved { .. } => StepPhase::Complete,
            PlanningOutcome::Timeout { .. } => StepPhase::Timeout,
            PlanningOutcome::Cancelled { .. } => StepPhase::Cancelled,
            PlanningOutcome::Error { .. } => StepPhase::Error,
        }
    }

    fn error_outcome(&self, message: String) -> PlanningOutcome {
        PlanningOutcome::Error { message }
    }

    fn timeout_outcome(&self, elapsed_seconds: u64) -> PlanningOutcome {
        PlanningOutcome::Timeout { elapsed_seconds }
    }

    fn cancelled_outcome(&self, reason: &str) -> PlanningOutcome {
        PlanningOutcome::Cancelled {
            message: reason.to_string(),
        }
    }

    fn build_feedback_prompt(&self, state: &mut PlanningState, feedback: &str) -> Option<String> {
        let draft = state.draft.as_ref()?;
        let previous = serde_json::to_string_pretty(draft).ok()?;
        state.feedback.push(feedback.to_string());
        Some(format!(
            "Revise the implementation plan for this request:\n{}\n\nPrevious plan:\n{previous}\n\n\
             Reviewer feedback:\n{}\n\nReturn the complete revised plan in the same format.",
            state.request.trim(),
            feedback.trim()
        ))
    }

    fn approved_outcome(&self, state: &PlanningState) -> Option<PlanningOutcome> {
        state
            .draft
            .clone()
            .map(|plan| PlanningOutcome::Approved { plan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryAuditSink;
    use std::sync::Arc;

    fn validator() -> StructuredOutputValidator {
        StructuredOutputValidator::new(Arc::new(MemoryAuditSink::new()), "planning")
    }

    fn plan_json(summary: &str) -> serde_json::Value {
        serde_json::json!({
            "summary": summary,
            "tasks": [{"title": "Add limiter", "description": "Wrap login handler", "files": ["src/auth.rs"]}]
        })
    }

    #[test]
    fn test_plan_ready_awaits_review() {
        let step = PlanningStep;
        let mut state = step.create_working_state(&PlanningInput {
            request: "rate limit login".to_string(),
            relevant_files: vec!["src/auth.rs".to_string()],
        });

        let outcome = step.process_structured_output(
            &ProviderResult::success(plan_json("Limit login attempts")),
            &validator(),
            "s1",
            &mut state,
        );
        assert!(matches!(outcome, PlanningOutcome::PlanReady { revision: 1, .. }));
        assert_eq!(step.terminal_phase(&outcome), StepPhase::AwaitingReview);
        assert!(step.is_gate());
        assert_eq!(state.draft.as_ref().map(|d| d.tasks.len()), Some(1));
    }

    #[test]
    fn test_empty_tasks_rejected() {
        let step = PlanningStep;
        let mut state = PlanningState::default();
        let outcome = step.process_structured_output(
            &ProviderResult::success(serde_json::json!({"summary": "x", "tasks": []})),
            &validator(),
            "s1",
            &mut state,
        );
        assert!(matches!(outcome, PlanningOutcome::Error { .. }));
        assert_eq!(step.terminal_phase(&outcome), StepPhase::Error);
        assert_eq!(state.revision, 0);
    }

    #[test]
    fn test_feedback_requires_draft() {
        let step = PlanningStep;
        let mut state = PlanningState::default();
        assert!(step.build_feedback_prompt(&mut state, "more tests").is_none());
        assert!(step.approved_outcome(&state).is_none());
        assert!(state.feedback.is_empty());
    }

    #[test]
    fn test_feedback_prompt_and_approval() {
        let step = PlanningStep;
        let mut state = PlanningState {
            request: "rate limit login".to_string(),
            ..Default::default()
        };
        step.process_structured_output(
            &ProviderResult::success(plan_json("v1")),
            &validator(),
            "s1",
            &mut state,
        );

        let prompt = step
            .build_feedback_prompt(&mut state, "Add an integration test task")
            .unwrap();
        assert!(prompt.contains("Add an integration test task"));
        assert!(prompt.contains("Add limiter"));
        assert_eq!(state.feedback, vec!["Add an integration test task"]);

        match step.approved_outcome(&state) {
            Some(PlanningOutcome::Approved { plan }) => assert_eq!(plan.summary, "v1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
