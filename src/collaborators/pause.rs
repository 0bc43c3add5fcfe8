//! Workflow 暂停策略

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::StepError;

/// step 完成后 workflow 是否暂停
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseBehavior {
    /// 每个 step 之后都暂停
    #[default]
    AutoPause,
    /// 从不暂停
    Continuous,
    /// 仅在 gate step 之后暂停
    GatesOnly,
}

impl PauseBehavior {
    pub fn should_pause(&self, is_gate: bool) -> bool {
        match self {
            PauseBehavior::AutoPause => true,
            PauseBehavior::Continuous => false,
            PauseBehavior::GatesOnly => is_gate,
        }
    }
}

impl std::str::FromStr for PauseBehavior {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto_pause" => Ok(PauseBehavior::AutoPause),
            "continuous" => Ok(PauseBehavior::Continuous),
            "gates_only" => Ok(PauseBehavior::GatesOnly),
            other => Err(StepError::PauseBehavior(format!("unknown pause behavior: {other}"))),
        }
    }
}

/// 暂停策略解析（通常来自 workflow 持久化记录）
#[async_trait]
pub trait PauseBehaviorResolver: Send + Sync {
    async fn get_pause_behavior(&self, workflow_id: &str) -> Result<PauseBehavior, StepError>;
}

/// 固定策略
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPauseResolver(pub PauseBehavior);

#[async_trait]
impl PauseBehaviorResolver for StaticPauseResolver {
    async fn get_pause_behavior(&self, _workflow_id: &str) -> Result<PauseBehavior, StepError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_pause() {
        assert!(PauseBehavior::AutoPause.should_pause(false));
        assert!(!PauseBehavior::Continuous.should_pause(true));
        assert!(PauseBehavior::GatesOnly.should_pause(true));
        assert!(!PauseBehavior::GatesOnly.should_pause(false));
    }

    #[test]
    fn test_parse() {
        assert_eq!("gates_only".parse::<PauseBehavior>().unwrap(), PauseBehavior::GatesOnly);
        assert_eq!(" Continuous ".parse::<PauseBehavior>().unwrap(), PauseBehavior::Continuous);
        assert!("sometimes".parse::<PauseBehavior>().is_err());
    }
}
