//! relay-config - 传输配置解析
//!
//! 启动时读取一次环境变量（`KAFKA_ENV`、`MSK_BOOTSTRAP_SERVERS`、`AWS_REGION`
//! 以及 `RELAY_*` 覆盖项），解析为一份完整的 [`TransportConfig`]，
//! 之后以只读方式在所有组件间共享。

mod environment;
mod resolver;
mod settings;
mod transport;

pub use environment::*;
pub use resolver::*;
pub use settings::*;
pub use transport::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Unknown KAFKA_ENV value '{0}' (expected 'local' or 'aws')")]
    UnknownEnvironment(String),

    #[error("Missing required setting {key} for the {environment} environment")]
    Missing {
        environment: Environment,
        key: &'static str,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Endpoint '{endpoint}' does not match security mode {security}")]
    InconsistentSecurity {
        endpoint: String,
        security: SecurityMode,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
