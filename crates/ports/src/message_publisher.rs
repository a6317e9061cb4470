//! Message Publisher trait 定义

use async_trait::async_trait;

use crate::{ProduceOutcome, ProduceRequest};

/// 消息发布者 trait
///
/// 失败通过 `ProduceOutcome::Failed` 返回，不会以 `Err` 形式抛出传输层异常。
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// 发布一条消息并等待确认
    async fn publish(&self, request: ProduceRequest) -> ProduceOutcome;

    /// 等待所有在途消息发送完成
    async fn flush(&self);
}
