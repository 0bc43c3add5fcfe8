//! 发现 step：在代码库中找出与需求相关的文件，并说明每个文件的相关原因

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::collaborators::AgentConfig;
use crate::output::StructuredOutputValidator;
use crate::provider::ProviderResult;
use crate::step::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryInput {
    pub request: String,
    pub repository_root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiscoveredFile {
    pub path: String,
    /// 为什么与需求相关
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DiscoveryOutput {
    #[serde(default)]
    pub files: Vec<DiscoveredFile>,
    /// files 为空时说明原因
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryState {
    pub repository_root: String,
    pub files: Vec<DiscoveredFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryOutcome {
    Success {
        files: Vec<DiscoveredFile>,
        summary: Option<String>,
    },
    NoFilesFound { reason: String },
    Error { message: String },
    Timeout { elapsed_seconds: u64 },
    Cancelled { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryStep;

impl StepDefinition for DiscoveryStep {
    type Input = DiscoveryInput;
    type Output = DiscoveryOutput;
    type Outcome = DiscoveryOutcome;
    type WorkingState = DiscoveryState;

    fn name(&self) -> &'static str {
        "discovery"
    }

    fn create_working_state(&self, input: &DiscoveryInput) -> DiscoveryState {
        DiscoveryState {
            repository_root: input.repository_root.clone(),
            files: Vec::new(),
        }
    }

    fn build_prompt(&self, input: &DiscoveryInput, agent: &AgentConfig) -> String {
        let mut prompt = format!(
            "Find the files in the repository at {} that are relevant to implementing this request:\n\n{}\n",
            input.repository_root,
            input.request.trim()
        );
        if !agent.allowed_tools.is_empty() {
            prompt.push_str(&format!(
                "\nUse only these tools to explore: {}.\n",
                agent.allowed_tools.join(", ")
            ));
        }
        prompt.push_str(
            "\nReturn every relevant file with its path relative to the repository root and a one-line \
             reason. If nothing relevant exists, return an empty files list and explain in summary.",
        );
        prompt
    }

    fn process_structured_output(
        &self,
        result: &ProviderResult,
        validator: &StructuredOutputValidator,
        session_id: &str,
        state: &mut DiscoveryState,
    ) -> DiscoveryOutcome {
        let output: DiscoveryOutput = match validator.validate(result, session_id) {
            Ok(o) => o,
            Err(e) => return self.error_outcome(e.to_string()),
        };

        if output.files.is_empty() {
            return DiscoveryOutcome::NoFilesFound {
                reason: output
                    .summary
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "No relevant files found".to_string()),
            };
        }

        let payload = result.structured_output.clone().unwrap_or_default();
        let entries = payload["files"].as_array().cloned().unwrap_or_default();
        for entry in &entries {
            for field in ["path", "reason"] {
                if let Err(e) = validator.validate_field(entry, field, session_id) {
                    return self.error_outcome(e.to_string());
                }
            }
        }

        state.files = output.files.clone();
        DiscoveryOutcome::Success {
            files: output.files,
            summary: output.summary,
        }
    }

    fn is_success(&self, outcome: &DiscoveryOutcome) -> bool {
        matches!(
            outcome,
            DiscoveryOutcome::Success { .. } | DiscoveryOutcome::NoFilesFound { .. }
        )
    }

    fn error_outcome(&self, message: String) -> DiscoveryOutcome {
        DiscoveryOutcome::Error { message }
    }

    fn timeout_outcome(&self, elapsed_seconds: u64) -> DiscoveryOutcome {
        DiscoveryOutcome::Timeout { elapsed_seconds }
    }

    fn cancelled_outcome(&self, reason: &str) -> DiscoveryOutcome {
        DiscoveryOutcome::Cancelled {
            message: reason.to_string(),
        }
    }
}
