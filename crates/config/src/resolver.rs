//! 传输配置解析器
//!
//! 纯函数：相同的环境和覆盖项总是得到相同的配置，不做任何网络调用。

use std::time::Duration;

use relay_common::RetryPolicy;
use secrecy::Secret;
use serde::Deserialize;

use crate::{
    ApiVersionNegotiation, ConfigError, ConsumerSettings, Endpoint, Environment, SaslMechanism,
    SaslSettings, SecurityMode, TransportConfig,
};

const LOCAL_BOOTSTRAP: &str = "localhost:9092";
const DEFAULT_AWS_REGION: &str = "us-east-1";
const DEFAULT_GROUP_ID: &str = "relay-consumer-group";

/// 覆盖项，未设置的字段取环境默认值
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportOverrides {
    /// 逗号分隔
    pub bootstrap_servers: Option<String>,
    pub security_mode: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<Secret<String>>,
    pub aws_region: Option<String>,
    pub client_id: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub max_message_bytes: Option<usize>,
    pub group_id: Option<String>,
    pub poll_timeout_ms: Option<u64>,
    pub allow_auto_create_topics: Option<bool>,
}

/// 环境默认值
struct Profile {
    bootstrap: Option<&'static str>,
    security: SecurityMode,
    sasl_mechanism: Option<SaslMechanism>,
    api_version: ApiVersionNegotiation,
}

impl Profile {
    fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Local => Self {
                bootstrap: Some(LOCAL_BOOTSTRAP),
                security: SecurityMode::Plaintext,
                sasl_mechanism: None,
                api_version: ApiVersionNegotiation {
                    request: true,
                    fallback_ms: Some(0),
                    broker_version_fallback: Some("0.10.0.0".to_string()),
                },
            },
            Environment::Aws => Self {
                bootstrap: None,
                security: SecurityMode::SaslTls,
                sasl_mechanism: Some(SaslMechanism::AwsMskIam),
                api_version: ApiVersionNegotiation {
                    request: true,
                    fallback_ms: None,
                    broker_version_fallback: None,
                },
            },
        }
    }
}

/// 解析出完整的传输配置
pub fn resolve(
    environment: Environment,
    overrides: &TransportOverrides,
) -> Result<TransportConfig, ConfigError> {
    let profile = Profile::for_environment(environment);

    let servers = non_blank(&overrides.bootstrap_servers)
        .or(profile.bootstrap)
        .ok_or(ConfigError::Missing {
            environment,
            key: "MSK_BOOTSTRAP_SERVERS",
        })?;
    let bootstrap_servers = parse_endpoints(servers, environment)?;

    let security = match non_blank(&overrides.security_mode) {
        Some(mode) => mode.parse()?,
        None => profile.security,
    };

    if let Some(endpoint) = bootstrap_servers.iter().find(|e| !e.matches(security)) {
        return Err(ConfigError::InconsistentSecurity {
            endpoint: format!(
                "{}://{}",
                endpoint.scheme.as_deref().unwrap_or_default(),
                endpoint
            ),
            security,
        });
    }

    let sasl = resolve_sasl(environment, security, &profile, overrides)?;

    let aws_region = match environment {
        Environment::Aws => Some(
            non_blank(&overrides.aws_region)
                .unwrap_or(DEFAULT_AWS_REGION)
                .to_string(),
        ),
        Environment::Local => non_blank(&overrides.aws_region).map(str::to_string),
    };

    let request_timeout_ms = positive(overrides.request_timeout_ms, 10_000, "request_timeout_ms")?;
    let poll_timeout_ms = positive(overrides.poll_timeout_ms, 1_000, "poll_timeout_ms")?;
    let max_message_bytes = overrides.max_message_bytes.unwrap_or(1_000_000);
    if max_message_bytes == 0 {
        return Err(ConfigError::invalid(
            "max_message_bytes",
            "must be greater than zero",
        ));
    }

    let group_id = match &overrides.group_id {
        Some(group) if group.trim().is_empty() => {
            return Err(ConfigError::invalid("group_id", "must not be empty"));
        }
        Some(group) => group.trim().to_string(),
        None => DEFAULT_GROUP_ID.to_string(),
    };

    Ok(TransportConfig {
        environment,
        client_id: non_blank(&overrides.client_id).map(str::to_string),
        bootstrap_servers,
        security,
        sasl,
        aws_region,
        request_timeout: Duration::from_millis(request_timeout_ms),
        retry: RetryPolicy::new(
            overrides.retries.unwrap_or(3),
            Duration::from_millis(overrides.retry_backoff_ms.unwrap_or(500)),
        ),
        max_message_bytes,
        api_version: profile.api_version,
        consumer: ConsumerSettings {
            group_id,
            poll_timeout: Duration::from_millis(poll_timeout_ms),
            session_timeout: Duration::from_secs(30),
            max_poll_interval: Duration::from_secs(300),
            auto_offset_reset: "earliest".to_string(),
            allow_auto_create_topics: overrides.allow_auto_create_topics.unwrap_or(false),
        },
    })
}

fn resolve_sasl(
    environment: Environment,
    security: SecurityMode,
    profile: &Profile,
    overrides: &TransportOverrides,
) -> Result<Option<SaslSettings>, ConfigError> {
    let requested = match non_blank(&overrides.sasl_mechanism) {
        Some(raw) => Some(raw.parse::<SaslMechanism>()?),
        None => None,
    };

    if security != SecurityMode::SaslTls {
        if requested.is_some() {
            return Err(ConfigError::invalid(
                "sasl_mechanism",
                format!("requires security mode sasl_ssl, got {}", security),
            ));
        }
        return Ok(None);
    }

    let mechanism = requested
        .or(profile.sasl_mechanism)
        .ok_or(ConfigError::Missing {
            environment,
            key: "RELAY_SASL_MECHANISM",
        })?;

    let username = non_blank(&overrides.sasl_username).map(str::to_string);
    let password = overrides.sasl_password.clone();

    if mechanism.needs_credentials() {
        if username.is_none() {
            return Err(ConfigError::Missing {
                environment,
                key: "RELAY_SASL_USERNAME",
            });
        }
        if password.is_none() {
            return Err(ConfigError::Missing {
                environment,
                key: "RELAY_SASL_PASSWORD",
            });
        }
    }

    Ok(Some(SaslSettings {
        mechanism,
        username,
        password,
    }))
}

fn parse_endpoints(raw: &str, environment: Environment) -> Result<Vec<Endpoint>, ConfigError> {
    let endpoints = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Endpoint>)
        .collect::<Result<Vec<_>, _>>()?;

    if endpoints.is_empty() {
        return Err(ConfigError::Missing {
            environment,
            key: "MSK_BOOTSTRAP_SERVERS",
        });
    }

    Ok(endpoints)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn positive(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::invalid(key, "must be greater than zero")),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}
