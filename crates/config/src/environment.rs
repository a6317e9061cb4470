//! 环境选择器

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::ConfigError;

/// 运行环境，进程启动时确定，之后不可变
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 本地 Docker broker
    #[default]
    Local,
    /// AWS MSK 托管集群
    Aws,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Aws => "aws",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Environment::Local),
            "aws" | "msk" => Ok(Environment::Aws),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// 安全协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Plaintext,
    Tls,
    SaslTls,
}

impl SecurityMode {
    /// librdkafka `security.protocol` 取值
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Plaintext => "plaintext",
            SecurityMode::Tls => "ssl",
            SecurityMode::SaslTls => "sasl_ssl",
        }
    }

    /// 对应的 listener scheme（如 `SASL_SSL://host:9096`）
    pub fn scheme(&self) -> &'static str {
        match self {
            SecurityMode::Plaintext => "PLAINTEXT",
            SecurityMode::Tls => "SSL",
            SecurityMode::SaslTls => "SASL_SSL",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "plaintext" => Ok(SecurityMode::Plaintext),
            "ssl" | "tls" => Ok(SecurityMode::Tls),
            "sasl_ssl" | "sasl_tls" => Ok(SecurityMode::SaslTls),
            other => Err(ConfigError::invalid(
                "security_mode",
                format!("unsupported security mode '{}'", other),
            )),
        }
    }
}

/// SASL 认证机制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
    /// MSK IAM，经由 OAUTHBEARER 承载
    AwsMskIam,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::AwsMskIam => "AWS_MSK_IAM",
        }
    }

    /// librdkafka `sasl.mechanism` 取值
    pub fn client_value(&self) -> &'static str {
        match self {
            SaslMechanism::AwsMskIam => "OAUTHBEARER",
            other => other.as_str(),
        }
    }

    /// 是否需要用户名和密码
    pub fn needs_credentials(&self) -> bool {
        !matches!(self, SaslMechanism::AwsMskIam)
    }
}

impl FromStr for SaslMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "PLAIN" => Ok(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            "AWS-MSK-IAM" => Ok(SaslMechanism::AwsMskIam),
            other => Err(ConfigError::invalid(
                "sasl_mechanism",
                format!("unsupported SASL mechanism '{}'", other),
            )),
        }
    }
}
