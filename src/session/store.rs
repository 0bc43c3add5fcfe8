//! Step 会话注册表
//!
//! 以 workflow id 为键，每个 workflow 同时最多一个活跃会话。
//! 检查与插入、查找与移除都在同一把写锁内完成，锁不会跨越 await 持有到执行阶段。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::StepError;
use crate::session::StepSession;

pub type SharedSession<S> = Arc<RwLock<StepSession<S>>>;

struct Entry<S> {
    session_id: String,
    session: SharedSession<S>,
}

/// 会话注册表：workflow id -> Session
pub struct StepSessionStore<S> {
    sessions: RwLock<HashMap<String, Entry<S>>>,
}

impl<S> StepSessionStore<S> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 创建并注册会话；该 workflow 已有会话时返回 SessionExists，原会话不受影响
    pub async fn create(
        &self,
        workflow_id: &str,
        working_state: S,
    ) -> Result<SharedSession<S>, StepError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(workflow_id) {
            return Err(StepError::SessionExists(workflow_id.to_string()));
        }
        let session = StepSession::new(workflow_id, working_state);
        let session_id = session.id.clone();
        let shared = Arc::new(RwLock::new(session));
        sessions.insert(
            workflow_id.to_string(),
            Entry {
                session_id,
                session: shared.clone(),
            },
        );
        Ok(shared)
    }

    pub async fn get(&self, workflow_id: &str) -> Option<SharedSession<S>> {
        self.sessions
            .read()
            .await
            .get(workflow_id)
            .map(|e| e.session.clone())
    }

    /// 移除并返回该 workflow 的会话
    pub async fn remove(&self, workflow_id: &str) -> Option<SharedSession<S>> {
        self.sessions
            .write()
            .await
            .remove(workflow_id)
            .map(|e| e.session)
    }

    /// 仅当注册的仍是指定 session 时才移除，避免误删后续 start 创建的新会话
    pub async fn remove_if_current(&self, workflow_id: &str, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(workflow_id) {
            Some(entry) if entry.session_id == session_id => {
                sessions.remove(workflow_id);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, workflow_id: &str) -> bool {
        self.sessions.read().await.contains_key(workflow_id)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl<S> Default for StepSessionStore<S> {
    fn default() -> Self {
        Self::new()
    }
}
