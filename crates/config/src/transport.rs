//! 传输配置
//!
//! 解析完成后只读，producer 和所有 consumer 共享同一份。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use relay_common::RetryPolicy;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

use crate::{ConfigError, Environment, SaslMechanism, SecurityMode};

/// bootstrap 地址 `host:port`，可带 listener scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// scheme 与安全协议是否一致（无 scheme 时总是一致）
    pub fn matches(&self, security: SecurityMode) -> bool {
        self.scheme
            .as_deref()
            .is_none_or(|scheme| scheme.eq_ignore_ascii_case(security.scheme()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (scheme, address) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_uppercase()), rest),
            None => (None, raw),
        };

        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            ConfigError::invalid("bootstrap_servers", format!("'{}' is not host:port", raw))
        })?;

        if host.is_empty() {
            return Err(ConfigError::invalid(
                "bootstrap_servers",
                format!("'{}' has an empty host", raw),
            ));
        }

        let port = port.parse::<u16>().map_err(|_| {
            ConfigError::invalid("bootstrap_servers", format!("'{}' has an invalid port", raw))
        })?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

/// SASL 配置
#[derive(Debug, Clone)]
pub struct SaslSettings {
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
}

/// API 版本协商参数（兼容旧版 broker）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiVersionNegotiation {
    pub request: bool,
    pub fallback_ms: Option<u64>,
    pub broker_version_fallback: Option<String>,
}

/// Consumer 专用参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub group_id: String,
    /// 单次 poll 最长阻塞时间
    pub poll_timeout: Duration,
    pub session_timeout: Duration,
    pub max_poll_interval: Duration,
    pub auto_offset_reset: String,
    pub allow_auto_create_topics: bool,
}

/// 完整传输配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub environment: Environment,
    pub client_id: Option<String>,
    /// 非空
    pub bootstrap_servers: Vec<Endpoint>,
    pub security: SecurityMode,
    pub sasl: Option<SaslSettings>,
    pub aws_region: Option<String>,
    pub request_timeout: Duration,
    /// gateway 侧唯一的重试边界，传输层内部重试关闭
    pub retry: RetryPolicy,
    pub max_message_bytes: usize,
    pub api_version: ApiVersionNegotiation,
    pub consumer: ConsumerSettings,
}

impl TransportConfig {
    /// `host:port,host:port`
    pub fn bootstrap_servers_string(&self) -> String {
        self.bootstrap_servers
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// producer/consumer 共用的 librdkafka 配置项
    pub fn base_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            (
                "bootstrap.servers".to_string(),
                self.bootstrap_servers_string(),
            ),
            (
                "security.protocol".to_string(),
                self.security.as_str().to_string(),
            ),
            (
                "api.version.request".to_string(),
                self.api_version.request.to_string(),
            ),
        ];

        if let Some(client_id) = &self.client_id {
            entries.push(("client.id".to_string(), client_id.clone()));
        }

        if let Some(ms) = self.api_version.fallback_ms {
            entries.push(("api.version.fallback.ms".to_string(), ms.to_string()));
        }
        if let Some(version) = &self.api_version.broker_version_fallback {
            entries.push(("broker.version.fallback".to_string(), version.clone()));
        }

        if let Some(sasl) = &self.sasl {
            entries.push((
                "sasl.mechanism".to_string(),
                sasl.mechanism.client_value().to_string(),
            ));
            if let Some(username) = &sasl.username {
                entries.push(("sasl.username".to_string(), username.clone()));
            }
            if let Some(password) = &sasl.password {
                entries.push((
                    "sasl.password".to_string(),
                    password.expose_secret().clone(),
                ));
            }
        }

        entries
    }

    /// producer 配置项
    ///
    /// `retries=0`：重试只发生在 gateway 的重试循环里。
    pub fn producer_entries(&self) -> Vec<(String, String)> {
        let timeout_ms = self.request_timeout.as_millis().to_string();
        let mut entries = self.base_entries();

        entries.push(("acks".to_string(), "all".to_string()));
        entries.push(("retries".to_string(), "0".to_string()));
        entries.push(("request.timeout.ms".to_string(), timeout_ms.clone()));
        entries.push(("message.timeout.ms".to_string(), timeout_ms));
        entries.push((
            "message.max.bytes".to_string(),
            self.max_message_bytes.to_string(),
        ));

        entries
    }

    /// consumer 配置项，offset 由 runner 显式提交
    pub fn consumer_entries(&self) -> Vec<(String, String)> {
        let consumer = &self.consumer;
        let mut entries = self.base_entries();

        entries.push(("group.id".to_string(), consumer.group_id.clone()));
        entries.push(("enable.auto.commit".to_string(), "false".to_string()));
        entries.push(("enable.partition.eof".to_string(), "false".to_string()));
        entries.push((
            "auto.offset.reset".to_string(),
            consumer.auto_offset_reset.clone(),
        ));
        entries.push((
            "session.timeout.ms".to_string(),
            consumer.session_timeout.as_millis().to_string(),
        ));
        entries.push((
            "max.poll.interval.ms".to_string(),
            consumer.max_poll_interval.as_millis().to_string(),
        ));
        entries.push((
            "allow.auto.create.topics".to_string(),
            consumer.allow_auto_create_topics.to_string(),
        ));

        entries
    }

    /// 不含密钥的配置摘要，用于日志和健康检查
    pub fn summary(&self) -> TransportSummary {
        TransportSummary {
            environment: self.environment,
            bootstrap_servers: self.bootstrap_servers_string(),
            security: self.security,
            sasl_mechanism: self.sasl.as_ref().map(|s| s.mechanism.as_str()),
            aws_region: self.aws_region.clone(),
            request_timeout_ms: self.request_timeout.as_millis() as u64,
            retries: self.retry.retries,
            retry_backoff_ms: self.retry.backoff.as_millis() as u64,
            max_message_bytes: self.max_message_bytes,
            group_id: self.consumer.group_id.clone(),
        }
    }
}

/// 配置摘要
#[derive(Debug, Clone, Serialize)]
pub struct TransportSummary {
    pub environment: Environment,
    pub bootstrap_servers: String,
    pub security: SecurityMode,
    pub sasl_mechanism: Option<&'static str>,
    pub aws_region: Option<String>,
    pub request_timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub max_message_bytes: usize,
    pub group_id: String,
}
