//! 共享状态

use std::sync::Arc;

use async_trait::async_trait;
use relay_adapter_kafka::{HealthCheckResult, KafkaHealthChecker, TopicInfo};
use relay_config::TransportConfig;
use relay_errors::AppResult;
use relay_ports::MessagePublisher;

/// broker 连通性探测
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    async fn probe(&self) -> HealthCheckResult;

    async fn topics(&self) -> AppResult<Vec<TopicInfo>>;
}

/// 通过集群元数据探测，启动时创建一次
pub struct KafkaBrokerProbe {
    checker: KafkaHealthChecker,
}

impl KafkaBrokerProbe {
    pub fn new(config: &TransportConfig) -> AppResult<Self> {
        Ok(Self {
            checker: KafkaHealthChecker::new(config)?,
        })
    }
}

#[async_trait]
impl BrokerProbe for KafkaBrokerProbe {
    async fn probe(&self) -> HealthCheckResult {
        self.checker.probe().await
    }

    async fn topics(&self) -> AppResult<Vec<TopicInfo>> {
        self.checker.topics().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn MessagePublisher>,
    pub probe: Arc<dyn BrokerProbe>,
    pub transport: Arc<TransportConfig>,
}
