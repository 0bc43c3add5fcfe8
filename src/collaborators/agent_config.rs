//! Agent 配置与加载器
//!
//! AgentConfig 在会话开始时加载一次，之后只读；FileAgentConfigLoader 从 `<dir>/<agent_id>.toml` 读取。

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::StepError;

/// Provider 权限模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// 生命周期钩子（事件名 + 命令）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    pub event: String,
    pub command: String,
}

/// Agent 配置快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 文件中省略时取文件名
    #[serde(default)]
    pub agent_id: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    /// 扩展推理 token 预算；设置后抑制部分流式输出并改发心跳
    #[serde(default)]
    pub thinking_budget_tokens: Option<u32>,
    /// 已停用的 agent 不可加载
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            system_prompt: String::new(),
            permission_mode: PermissionMode::Default,
            allowed_tools: Vec::new(),
            skills: Vec::new(),
            hooks: Vec::new(),
            thinking_budget_tokens: None,
            active: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn with_thinking_budget(mut self, tokens: u32) -> Self {
        self.thinking_budget_tokens = Some(tokens);
        self
    }
}

/// Agent 配置加载器；失败时由编排器转为 ERROR outcome
#[async_trait]
pub trait AgentConfigLoader: Send + Sync {
    async fn load_agent_config(
        &self,
        workflow_id: &str,
        agent_id: &str,
    ) -> Result<AgentConfig, StepError>;
}

/// 内存中的配置表（测试与嵌入场景）
#[derive(Debug, Default, Clone)]
pub struct StaticAgentConfigLoader {
    agents: HashMap<String, AgentConfig>,
}

impl StaticAgentConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, config: AgentConfig) -> Self {
        self.agents.insert(config.agent_id.clone(), config);
        self
    }
}

#[async_trait]
impl AgentConfigLoader for StaticAgentConfigLoader {
    async fn load_agent_config(
        &self,
        _workflow_id: &str,
        agent_id: &str,
    ) -> Result<AgentConfig, StepError> {
        let config = self
            .agents
            .get(agent_id)
            .ok_or_else(|| StepError::AgentConfig(format!("agent {agent_id} not found")))?;
        if !config.active {
            return Err(StepError::AgentConfig(format!("agent {agent_id} is deactivated")));
        }
        Ok(config.clone())
    }
}

/// 从目录读取 `<agent_id>.toml`
#[derive(Debug, Clone)]
pub struct FileAgentConfigLoader {
    dir: PathBuf,
}

impl FileAgentConfigLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AgentConfigLoader for FileAgentConfigLoader {
    async fn load_agent_config(
        &self,
        workflow_id: &str,
        agent_id: &str,
    ) -> Result<AgentConfig, StepError> {
        if agent_id.is_empty() || agent_id.contains(['/', '\\']) || agent_id.contains("..") {
            return Err(StepError::AgentConfig(format!("invalid agent id: {agent_id}")));
        }
        let path = self.dir.join(format!("{agent_id}.toml"));
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            StepError::AgentConfig(format!("agent {agent_id} not found ({}): {e}", path.display()))
        })?;

        let mut config: AgentConfig = toml::from_str(&raw)
            .map_err(|e| StepError::AgentConfig(format!("agent {agent_id}: {e}")))?;
        if config.agent_id.is_empty() {
            config.agent_id = agent_id.to_string();
        }
        if !config.active {
            return Err(StepError::AgentConfig(format!("agent {agent_id} is deactivated")));
        }
        tracing::debug!(workflow_id, agent_id, model = %config.model, "agent config loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_loader() {
        let loader = StaticAgentConfigLoader::new()
            .with_agent(AgentConfig::new("planner", "sonnet"));
        let config = loader.load_agent_config("wf-1", "planner").await.unwrap();
        assert_eq!(config.model, "sonnet");

        let err = loader.load_agent_config("wf-1", "missing").await.unwrap_err();
        assert!(matches!(err, StepError::AgentConfig(_)));
    }

    #[tokio::test]
    async fn test_file_loader_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("clarifier.toml"),
            r#"
agent_id = "clarifier"
model = "claude-sonnet"
system_prompt = "Ask precise questions."
permission_mode = "plan"
allowed_tools = ["Read", "Grep"]
thinking_budget_tokens = 4000

[[hooks]]
event = "pre_tool_use"
command = "echo hook"
"#,
        )
        .unwrap();

        let loader = FileAgentConfigLoader::new(dir.path());
        let config = loader.load_agent_config("wf-1", "clarifier").await.unwrap();
        assert_eq!(config.permission_mode, PermissionMode::Plan);
        assert_eq!(config.allowed_tools, vec!["Read", "Grep"]);
        assert_eq!(config.thinking_budget_tokens, Some(4000));
        assert_eq!(config.hooks.len(), 1);
        assert!(config.active);
    }

    #[tokio::test]
    async fn test_file_loader_rejects_deactivated_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("old.toml"),
            "agent_id = \"old\"\nmodel = \"m\"\nactive = false\n",
        )
        .unwrap();

        let loader = FileAgentConfigLoader::new(dir.path());
        let err = loader.load_agent_config("wf-1", "old").await.unwrap_err();
        assert!(err.to_string().contains("deactivated"));

        let err = loader.load_agent_config("wf-1", "nobody").await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = loader.load_agent_config("wf-1", "../etc").await.unwrap_err();
        assert!(err.to_string().contains("invalid agent id"));
    }
}
