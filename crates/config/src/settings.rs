//! 启动配置加载
//!
//! 优先级：`{config_dir}/relay.toml` < `KAFKA_ENV`/`MSK_BOOTSTRAP_SERVERS`/`AWS_REGION` < `RELAY_*`

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

use crate::{ConfigError, Environment, TransportConfig, TransportOverrides, resolve};

/// 这些变量不带前缀，沿用既有部署脚本的命名
const RAW_ENV_KEYS: &[&str] = &["KAFKA_ENV", "MSK_BOOTSTRAP_SERVERS", "AWS_REGION"];

#[derive(Debug, Default, Deserialize)]
struct Selector {
    kafka_env: Option<String>,
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
        }
    }
}

/// 进程级配置，启动时读取一次
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub environment: Environment,
    pub overrides: TransportOverrides,
    pub telemetry: TelemetryConfig,
    pub server: ServerConfig,
}

impl RelaySettings {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_dir))
    }

    pub fn figment(config_dir: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(format!("{}/relay.toml", config_dir)))
            .merge(Env::raw().only(RAW_ENV_KEYS).map(|key| {
                if key.as_str().eq_ignore_ascii_case("MSK_BOOTSTRAP_SERVERS") {
                    "bootstrap_servers".into()
                } else {
                    key.as_str().to_ascii_lowercase().into()
                }
            }))
            .merge(Env::prefixed("RELAY_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let selector: Selector = figment.extract()?;
        let environment = match selector.kafka_env {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };

        Ok(Self {
            environment,
            overrides: figment.extract()?,
            telemetry: figment.extract()?,
            server: figment.extract()?,
        })
    }

    /// 解析传输配置
    pub fn resolve(&self) -> Result<TransportConfig, ConfigError> {
        resolve(self.environment, &self.overrides)
    }
}
