//! 服务运行时

use std::sync::Arc;

use relay_config::{ConfigError, LogFormat, RelaySettings, TransportConfig};
use relay_telemetry::{init_tracing, init_tracing_json};
use tracing::{error, info};

/// 服务运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: "config".to_string(),
        }
    }
}

/// 启动完成后的共享状态
pub struct Runtime {
    pub settings: RelaySettings,
    /// 只读，所有组件共享
    pub transport: Arc<TransportConfig>,
}

/// 初始化服务运行时
///
/// 加载 `.env`，初始化 tracing，解析传输配置。配置不完整时返回错误，进程不应继续。
pub fn init_runtime(runtime: &RuntimeConfig) -> Result<Runtime, ConfigError> {
    // .env 可选
    let _ = dotenvy::dotenv();

    let settings = RelaySettings::load(&runtime.config_dir)?;

    match settings.telemetry.log_format {
        LogFormat::Json => init_tracing_json(&settings.telemetry.log_level),
        LogFormat::Text => init_tracing(&settings.telemetry.log_level),
    }

    let transport = settings.resolve().inspect_err(|e| {
        error!(environment = %settings.environment, error = %e, "Invalid transport configuration");
    })?;

    info!(
        environment = %transport.environment,
        summary = ?transport.summary(),
        "Runtime initialized"
    );

    Ok(Runtime {
        settings,
        transport: Arc::new(transport),
    })
}

/// 等待关闭信号（Ctrl+C 或 SIGTERM）
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
