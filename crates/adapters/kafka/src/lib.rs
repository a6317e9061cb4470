//! adapter-kafka - Kafka 适配器
//!
//! - 投递结果分类（`outcome`）
//! - 消息生产：本地校验、固定间隔重试、超时
//! - 消息消费：单订阅状态机，手动提交 offset
//! - 健康检查

pub mod outcome;

mod consumer;
mod health;
mod producer;
mod source;

pub use consumer::*;
pub use health::*;
pub use producer::*;
pub use source::*;
