//! relay-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::Unprocessable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::PayloadTooLarge(_) => 413,
            Self::Unprocessable(_) => 422,
            Self::Internal(_) => 500,
            Self::ExternalService(_) => 502,
            Self::Unavailable(_) => 503,
            Self::Timeout(_) => 504,
        }
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.to_string(),
            instance: None,
        }
    }

    fn problem_type(&self) -> String {
        let slug = match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::PayloadTooLarge(_) => "payload-too-large",
            Self::Unprocessable(_) => "unprocessable",
            Self::Internal(_) => "internal",
            Self::ExternalService(_) => "external-service",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
        };
        format!("https://kafka-relay.dev/problems/{}", slug)
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found".to_string(),
            Self::Validation(_) => "Validation Error".to_string(),
            Self::PayloadTooLarge(_) => "Payload Too Large".to_string(),
            Self::Unprocessable(_) => "Unprocessable Request".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
            Self::ExternalService(_) => "External Service Error".to_string(),
            Self::Unavailable(_) => "Service Unavailable".to_string(),
            Self::Timeout(_) => "Gateway Timeout".to_string(),
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
