//! 编排配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENTSTEP__*` 覆盖（双下划线表示嵌套，如 `AGENTSTEP__RETRY__MAX_RETRIES=5`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::collaborators::FileAgentConfigLoader;
use crate::core::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES};
use crate::core::StepError;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub retry: RetrySection,
    pub execution: ExecutionSection,
    /// 按 step 名覆盖，如 [steps.planning]
    pub steps: HashMap<String, StepSection>,
    pub logging: LoggingSection,
    pub agents: AgentsSection,
}

/// [retry] 段：最大重试次数与退避基数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// [execution] 段：默认超时与心跳间隔
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// [steps.<name>] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StepSection {
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// [agents] 段：FileAgentConfigLoader 读取的目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentsSection {
    pub config_dir: Option<PathBuf>,
}

impl AgentsSection {
    /// 未配置目录时使用 config/agents
    pub fn file_loader(&self) -> FileAgentConfigLoader {
        FileAgentConfigLoader::new(
            self.config_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("config/agents")),
        )
    }
}

/// 单个 StepOrchestrator 使用的已解析设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub default_timeout_secs: u64,
    pub heartbeat_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        AppConfig::default().settings_for("")
    }
}

impl AppConfig {
    /// 合并全局段与 [steps.<name>] 覆盖
    pub fn settings_for(&self, step_name: &str) -> OrchestratorSettings {
        let step = self.steps.get(step_name);
        OrchestratorSettings {
            max_retries: step
                .and_then(|s| s.max_retries)
                .unwrap_or(self.retry.max_retries),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            default_timeout_secs: step
                .and_then(|s| s.timeout_secs)
                .unwrap_or(self.execution.default_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.execution.heartbeat_interval_secs.max(1)),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AGENTSTEP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENTSTEP__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, StepError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENTSTEP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}
