//! 核心层：错误分类、阶段与快照、重试计数与退避、超时竞速

pub mod error;
pub mod retry;
pub mod state;
pub mod timeout;

pub use error::{ErrorClass, StepError};
pub use retry::{calculate_backoff_delay, is_transient_error, RetryTracker};
pub use state::{SessionState, StepPhase};
pub use timeout::{create_timeout_future, TimeoutHandle};
