//! 超时竞速
//!
//! create_timeout_future 返回一个在超时后结算为 on_timeout() 的 Future，以及可重复调用的清理句柄。
//! 定时器触发时若取消令牌已被触发，则不会结算（Future 永远挂起），避免取消与超时重复结算同一结果。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// 超时定时器句柄；cleanup 幂等，可在 Session 中克隆保存
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    timer: Arc<Mutex<Option<AbortHandle>>>,
}

impl TimeoutHandle {
    /// 取消尚未触发的定时器；重复调用无副作用
    pub fn cleanup(&self) {
        let taken = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = taken {
            handle.abort();
        }
    }

    /// 定时器是否仍由本句柄持有（未 cleanup）
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// 创建与执行过程竞速的超时 Future
///
/// 调用方在执行 Future 结算后（无论谁赢）都必须调用 `cleanup()`。
/// 需在 tokio 运行时内调用。
pub fn create_timeout_future<T, F>(
    timeout: Duration,
    cancel_token: CancellationToken,
    on_timeout: F,
) -> (BoxFuture<'static, T>, TimeoutHandle)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                if cancel_token.is_cancelled() {
                    return;
                }
                let _ = tx.send(on_timeout());
            }
            _ = cancel_token.cancelled() => {}
        }
    });

    let handle = TimeoutHandle {
        timer: Arc::new(Mutex::new(Some(task.abort_handle()))),
    };

    // 定时器被取消或清理时 sender 被丢弃，此时保持挂起
    let future = async move {
        match rx.await {
            Ok(value) => value,
            Err(_) => std::future::pending().await,
        }
    }
    .boxed();

    (future, handle)
}
