//! Kafka 健康检查模块
//!
//! 通过拉取集群元数据检查 broker 连通性，并提供连接诊断

use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::metadata::Metadata;
use relay_config::{Endpoint, TransportConfig};
use relay_errors::{AppError, AppResult};
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

/// 健康检查结果
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// 是否健康
    pub healthy: bool,
    /// 延迟（毫秒）
    pub latency_ms: Option<u64>,
    /// 错误信息
    pub error: Option<String>,
    pub broker_count: usize,
    pub topic_count: usize,
}

impl HealthCheckResult {
    fn unreachable(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            error: Some(error.into()),
            broker_count: 0,
            topic_count: 0,
        }
    }
}

/// Topic 信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partition_count: usize,
}

/// 单个 bootstrap 地址的 TCP 连通性
#[derive(Debug, Clone, Serialize)]
pub struct EndpointCheck {
    pub endpoint: String,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// 连接诊断结果
#[derive(Debug, Clone, Serialize)]
pub struct ClusterDiagnosis {
    pub endpoints: Vec<EndpointCheck>,
    pub broker: HealthCheckResult,
    pub topics: Vec<TopicInfo>,
}

impl ClusterDiagnosis {
    pub fn healthy(&self) -> bool {
        self.broker.healthy
    }
}

/// Kafka 健康检查器
///
/// 进程内创建一次，内部 client 在各次检查间复用。
#[derive(Clone)]
pub struct KafkaHealthChecker {
    consumer: Arc<BaseConsumer>,
    endpoints: Vec<Endpoint>,
    timeout: Duration,
}

impl KafkaHealthChecker {
    /// 创建健康检查器，使用与 producer 相同的连接参数
    pub fn new(config: &TransportConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();

        for (key, value) in config.base_entries() {
            client_config.set(&key, &value);
        }

        let consumer: BaseConsumer = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create health checker: {}", e)))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            endpoints: config.bootstrap_servers.clone(),
            timeout: config.request_timeout,
        })
    }

    /// 执行健康检查（阻塞）
    pub fn check(&self) -> HealthCheckResult {
        let start = Instant::now();

        match self.consumer.fetch_metadata(None, self.timeout) {
            Ok(metadata) => {
                let latency = start.elapsed().as_millis() as u64;
                let broker_count = metadata.brokers().len();
                let topic_count = metadata.topics().len();

                debug!(
                    latency_ms = latency,
                    brokers = broker_count,
                    topics = topic_count,
                    "Kafka health check passed"
                );

                HealthCheckResult {
                    healthy: broker_count > 0,
                    latency_ms: Some(latency),
                    error: None,
                    broker_count,
                    topic_count,
                }
            }
            Err(e) => {
                error!(error = %e, "Kafka health check failed");
                HealthCheckResult::unreachable(e.to_string())
            }
        }
    }

    /// 列出集群中的 topic（阻塞，不含内部 topic）
    pub fn list_topics(&self) -> AppResult<Vec<TopicInfo>> {
        let metadata = self
            .consumer
            .fetch_metadata(None, self.timeout)
            .map_err(|e| AppError::unavailable(format!("Failed to fetch metadata: {}", e)))?;

        Ok(topics_from_metadata(&metadata))
    }

    /// 在后台线程执行健康检查
    pub async fn probe(&self) -> HealthCheckResult {
        let checker = self.clone();
        tokio::task::spawn_blocking(move || checker.check())
            .await
            .unwrap_or_else(|e| {
                HealthCheckResult::unreachable(format!("Health check task failed: {}", e))
            })
    }

    /// 在后台线程列出 topic
    pub async fn topics(&self) -> AppResult<Vec<TopicInfo>> {
        let checker = self.clone();
        tokio::task::spawn_blocking(move || checker.list_topics())
            .await
            .map_err(|e| AppError::internal(format!("Topic listing task failed: {}", e)))?
    }

    /// 逐个检查 bootstrap 地址的 TCP 连通性，再拉取元数据
    ///
    /// 没有任何地址可连时不再拉取元数据。
    pub async fn diagnose(&self) -> ClusterDiagnosis {
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            endpoints.push(check_endpoint(endpoint, self.timeout).await);
        }

        if !endpoints.iter().any(|e| e.reachable) {
            return ClusterDiagnosis {
                endpoints,
                broker: HealthCheckResult::unreachable(
                    "No bootstrap endpoint accepted a TCP connection",
                ),
                topics: Vec::new(),
            };
        }

        let broker = self.probe().await;
        let topics = if broker.healthy {
            self.topics().await.unwrap_or_else(|e| {
                warn!(error = %e, "Topic listing failed");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        ClusterDiagnosis {
            endpoints,
            broker,
            topics,
        }
    }
}

/// 建立一次 TCP 连接后立即关闭
pub async fn check_endpoint(endpoint: &Endpoint, timeout: Duration) -> EndpointCheck {
    let start = Instant::now();
    let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));

    let error = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("Connection timed out after {}ms", timeout.as_millis())),
    };

    match &error {
        None => debug!(%endpoint, "TCP connection succeeded"),
        Some(e) => warn!(%endpoint, error = %e, "TCP connection failed"),
    }

    EndpointCheck {
        endpoint: endpoint.to_string(),
        reachable: error.is_none(),
        latency_ms: error.is_none().then(|| start.elapsed().as_millis() as u64),
        error,
    }
}

fn topics_from_metadata(metadata: &Metadata) -> Vec<TopicInfo> {
    let mut topics: Vec<TopicInfo> = metadata
        .topics()
        .iter()
        .filter(|t| !t.name().starts_with("__"))
        .map(|t| TopicInfo {
            name: t.name().to_string(),
            partition_count: t.partitions().len(),
        })
        .collect();
    topics.sort_by(|a, b| a.name.cmp(&b.name));
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_config::{Environment, TransportOverrides, resolve};
    use tokio::net::TcpListener;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            scheme: None,
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn test_unreachable_result() {
        let result = HealthCheckResult::unreachable("all brokers down");

        assert!(!result.healthy);
        assert_eq!(result.broker_count, 0);
        assert_eq!(result.error.as_deref(), Some("all brokers down"));
    }

    #[tokio::test]
    async fn test_endpoint_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let check = check_endpoint(&endpoint(port), Duration::from_secs(2)).await;

        assert!(check.reachable);
        assert!(check.latency_ms.is_some());
        assert!(check.error.is_none());
        assert_eq!(check.endpoint, format!("127.0.0.1:{}", port));
    }

    #[tokio::test]
    async fn test_endpoint_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let check = check_endpoint(&endpoint(port), Duration::from_secs(2)).await;

        assert!(!check.reachable);
        assert!(check.latency_ms.is_none());
        assert!(check.error.is_some());
    }

    #[test]
    fn test_checker_clones_share_client() {
        let config = resolve(Environment::Local, &TransportOverrides::default()).unwrap();
        let checker = KafkaHealthChecker::new(&config).unwrap();

        // probe/topics 在后台线程里用的是克隆
        let clone = checker.clone();
        assert!(Arc::ptr_eq(&checker.consumer, &clone.consumer));
        assert_eq!(clone.endpoints, config.bootstrap_servers);
    }

    #[tokio::test]
    async fn test_diagnose_stops_when_no_endpoint_reachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let overrides = TransportOverrides {
            bootstrap_servers: Some(format!("127.0.0.1:{}", port)),
            ..Default::default()
        };
        let config = resolve(Environment::Local, &overrides).unwrap();
        let checker = KafkaHealthChecker::new(&config).unwrap();

        let diagnosis = checker.diagnose().await;

        assert!(!diagnosis.healthy());
        assert_eq!(diagnosis.endpoints.len(), 1);
        assert!(!diagnosis.endpoints[0].reachable);
        assert!(diagnosis.topics.is_empty());
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_health_checker() {
        let config = resolve(Environment::Local, &TransportOverrides::default()).unwrap();
        let checker = KafkaHealthChecker::new(&config).unwrap();

        let diagnosis = checker.diagnose().await;
        assert!(diagnosis.healthy());
        assert_eq!(diagnosis.topics.len(), checker.topics().await.unwrap().len());
    }
}
