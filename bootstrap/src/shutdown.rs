//! Graceful Shutdown

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::shutdown_signal;

/// Shutdown 控制器
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给 consumer runner 等组件的停止信号
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.token.cancel();
    }

    /// 等待关闭
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.token.clone();
        async move { token.cancelled().await }
    }

    /// 收到进程信号时触发关闭
    pub fn listen_for_signals(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            controller.shutdown();
        });
    }
}

/// 运行带有 graceful shutdown 的任务
///
/// 关闭时任务被丢弃，返回 `None`。
pub async fn run_with_shutdown<Fut>(shutdown: &ShutdownController, task: Fut) -> Option<Fut::Output>
where
    Fut: Future,
{
    tokio::select! {
        result = task => Some(result),
        _ = shutdown.wait() => {
            info!("Task cancelled due to shutdown");
            None
        }
    }
}
