//! 生产请求与投递结果

use std::fmt;

use relay_errors::AppError;
use serde::Serialize;

/// 生产请求，每次调用构造一次，返回结果后丢弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub topic: String,
    pub payload: Vec<u8>,
    pub key: Option<Vec<u8>>,
}

impl ProduceRequest {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// broker 确认后的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// 传输层错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 瞬时网络/超时问题，可以重试
    Retryable,
    /// 授权、序列化、校验失败，重试无意义
    Terminal,
    /// 未识别的错误，按 Terminal 处理
    Unknown,
}

impl ErrorClass {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 本地拒绝：超过最大消息大小
    PayloadTooLarge,
    /// 本地拒绝：请求不合法
    InvalidRequest,
    /// 所有 broker 不可达
    BrokerUnavailable,
    /// 请求超时内未收到确认（可能已在服务端完成）
    Timeout,
    /// broker 侧校验失败
    Rejected,
    /// topic 不存在且未开启自动创建
    TopicNotFound,
    /// 认证或授权失败
    Unauthorized,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PayloadTooLarge => "payload_too_large",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::BrokerUnavailable => "broker_unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::Rejected => "rejected",
            FailureKind::TopicNotFound => "topic_not_found",
            FailureKind::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递失败详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub class: ErrorClass,
    /// 实际发给传输层的次数，本地拒绝时为 0
    pub attempts: u32,
    pub detail: String,
}

impl DeliveryFailure {
    /// 本地校验失败，未触达传输层
    pub fn local(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            class: ErrorClass::Terminal,
            attempts: 0,
            detail: detail.into(),
        }
    }

    /// 可重试错误耗尽了重试预算
    pub fn is_exhausted(&self) -> bool {
        self.class == ErrorClass::Retryable
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.kind, self.attempts, self.detail
        )
    }
}

impl From<&DeliveryFailure> for AppError {
    fn from(failure: &DeliveryFailure) -> Self {
        let msg = failure.to_string();
        match failure.kind {
            FailureKind::PayloadTooLarge => AppError::payload_too_large(msg),
            FailureKind::InvalidRequest => AppError::validation(msg),
            FailureKind::BrokerUnavailable => AppError::unavailable(msg),
            FailureKind::Timeout => AppError::timeout(msg),
            FailureKind::Rejected => AppError::unprocessable(msg),
            FailureKind::TopicNotFound => AppError::not_found(msg),
            FailureKind::Unauthorized => AppError::external_service(msg),
        }
    }
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Acknowledged,
    Failed,
}

/// 单次生产调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceOutcome {
    Acknowledged(DeliveryReceipt),
    Failed(DeliveryFailure),
}

impl ProduceOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            ProduceOutcome::Acknowledged(_) => DeliveryStatus::Acknowledged,
            ProduceOutcome::Failed(_) => DeliveryStatus::Failed,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, ProduceOutcome::Acknowledged(_))
    }

    pub fn receipt(&self) -> Option<DeliveryReceipt> {
        match self {
            ProduceOutcome::Acknowledged(receipt) => Some(*receipt),
            ProduceOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&DeliveryFailure> {
        match self {
            ProduceOutcome::Acknowledged(_) => None,
            ProduceOutcome::Failed(failure) => Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok = ProduceOutcome::Acknowledged(DeliveryReceipt {
            partition: 0,
            offset: 0,
        });
        assert_eq!(ok.status(), DeliveryStatus::Acknowledged);
        assert_eq!(ok.receipt().map(|r| r.offset), Some(0));
        assert!(ok.failure().is_none());

        let failed = ProduceOutcome::Failed(DeliveryFailure::local(
            FailureKind::PayloadTooLarge,
            "2000000 bytes",
        ));
        assert_eq!(failed.status(), DeliveryStatus::Failed);
        assert_eq!(failed.failure().unwrap().attempts, 0);
    }

    #[test]
    fn test_exhausted_vs_rejected() {
        let exhausted = DeliveryFailure {
            kind: FailureKind::BrokerUnavailable,
            class: ErrorClass::Retryable,
            attempts: 4,
            detail: "all brokers down".to_string(),
        };
        let rejected = DeliveryFailure {
            kind: FailureKind::Rejected,
            class: ErrorClass::Terminal,
            attempts: 1,
            detail: "invalid record".to_string(),
        };

        assert!(exhausted.is_exhausted());
        assert!(!rejected.is_exhausted());
    }

    #[test]
    fn test_failure_to_app_error() {
        let failure = DeliveryFailure::local(FailureKind::PayloadTooLarge, "too big");
        assert_eq!(AppError::from(&failure).status_code(), 413);

        let timeout = DeliveryFailure {
            kind: FailureKind::Timeout,
            class: ErrorClass::Retryable,
            attempts: 4,
            detail: "message timed out".to_string(),
        };
        assert_eq!(AppError::from(&timeout).status_code(), 504);
    }

    #[test]
    fn test_error_class_serialization() {
        let json = serde_json::to_string(&ErrorClass::Retryable).unwrap();
        assert_eq!(json, "\"retryable\"");
        assert!(!ErrorClass::Unknown.should_retry());
    }
}
