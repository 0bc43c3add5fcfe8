//! 会话层：单个 step 执行的内存记录与按 workflow 唯一的会话注册表

pub mod session;
pub mod store;

pub use session::{ActiveTool, StepSession};
pub use store::{SharedSession, StepSessionStore};
