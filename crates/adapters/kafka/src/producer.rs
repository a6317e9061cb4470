//! Kafka Producer
//!
//! `ProducerGateway` 负责本地校验、重试和结果分类；
//! 实际的网络发送交给 `ProduceTransport`。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use relay_common::with_classified_retry;
use relay_config::TransportConfig;
use relay_errors::{AppError, AppResult};
use relay_ports::{
    DeliveryFailure, DeliveryReceipt, FailureKind, MessagePublisher, ProduceOutcome,
    ProduceRequest,
};
use tracing::{debug, error, info, warn};

use crate::outcome::{classify, failure_kind};

/// 发送通道
///
/// 每次调用只做一次发送尝试，重试由 gateway 负责。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProduceTransport: Send + Sync {
    /// 发送一条消息并等待 broker 确认
    async fn send(
        &self,
        request: &ProduceRequest,
        timeout: Duration,
    ) -> Result<DeliveryReceipt, KafkaError>;

    /// 等待在途消息发送完成
    async fn flush(&self, timeout: Duration) -> Result<(), KafkaError>;
}

/// 基于 rdkafka `FutureProducer` 的发送通道
pub struct KafkaProduceTransport {
    producer: FutureProducer,
}

impl KafkaProduceTransport {
    pub fn new(config: &TransportConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();

        for (key, value) in config.producer_entries() {
            client_config.set(&key, &value);
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers_string(),
            security = %config.security,
            "Kafka producer created"
        );

        Ok(Self { producer })
    }
}

#[async_trait]
impl ProduceTransport for KafkaProduceTransport {
    async fn send(
        &self,
        request: &ProduceRequest,
        timeout: Duration,
    ) -> Result<DeliveryReceipt, KafkaError> {
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&request.topic).payload(request.payload.as_slice());
        if let Some(key) = &request.key {
            record = record.key(key.as_slice());
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(timeout))
            .await
            .map_err(|(e, _)| e)?;

        Ok(DeliveryReceipt { partition, offset })
    }

    async fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .unwrap_or(Err(KafkaError::Canceled))
    }
}

/// Producer gateway
///
/// 调用之间不保留状态，只共享只读的传输配置，可被多个请求并发调用。
pub struct ProducerGateway<T> {
    transport: T,
    config: Arc<TransportConfig>,
}

/// 生产环境使用的 gateway
pub type KafkaProducerGateway = ProducerGateway<KafkaProduceTransport>;

impl KafkaProducerGateway {
    /// 按传输配置创建 rdkafka producer
    pub fn connect(config: Arc<TransportConfig>) -> AppResult<Self> {
        let transport = KafkaProduceTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: ProduceTransport> ProducerGateway<T> {
    pub fn new(transport: T, config: Arc<TransportConfig>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 发送一条消息，直到确认、不可重试错误或重试预算耗尽
    pub async fn produce(&self, request: ProduceRequest) -> ProduceOutcome {
        if let Some(failure) = self.validate(&request) {
            warn!(
                topic = %request.topic,
                kind = %failure.kind,
                detail = %failure.detail,
                "Produce request rejected locally"
            );
            let outcome = ProduceOutcome::Failed(failure);
            record_produce(&request.topic, &outcome);
            return outcome;
        }

        let timeout = self.config.request_timeout;
        let transport = &self.transport;
        let req = &request;

        let result = with_classified_retry(
            &self.config.retry,
            "kafka_produce",
            move || async move {
                match tokio::time::timeout(timeout, transport.send(req, timeout)).await {
                    Ok(result) => result,
                    // 超时结果不确定，消息可能已经写入
                    Err(_) => Err(KafkaError::MessageProduction(
                        RDKafkaErrorCode::MessageTimedOut,
                    )),
                }
            },
            |e| classify(e).should_retry(),
        )
        .await;

        let outcome = match result {
            Ok((receipt, attempts)) => {
                debug!(
                    topic = %request.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    attempts,
                    "Message acknowledged"
                );
                ProduceOutcome::Acknowledged(receipt)
            }
            Err(failure) => {
                let failure = DeliveryFailure {
                    kind: failure_kind(&failure.error),
                    class: classify(&failure.error),
                    attempts: failure.attempts,
                    detail: failure.error.to_string(),
                };
                error!(
                    topic = %request.topic,
                    kind = %failure.kind,
                    attempts = failure.attempts,
                    exhausted = failure.is_exhausted(),
                    error = %failure.detail,
                    "Failed to produce message"
                );
                ProduceOutcome::Failed(failure)
            }
        };

        record_produce(&request.topic, &outcome);
        outcome
    }

    fn validate(&self, request: &ProduceRequest) -> Option<DeliveryFailure> {
        if request.topic.trim().is_empty() {
            return Some(DeliveryFailure::local(
                FailureKind::InvalidRequest,
                "topic must not be empty",
            ));
        }

        let limit = self.config.max_message_bytes;
        if request.payload.len() > limit {
            return Some(DeliveryFailure::local(
                FailureKind::PayloadTooLarge,
                format!(
                    "payload is {} bytes, limit is {} bytes",
                    request.payload.len(),
                    limit
                ),
            ));
        }

        None
    }
}

#[async_trait]
impl<T: ProduceTransport> MessagePublisher for ProducerGateway<T> {
    async fn publish(&self, request: ProduceRequest) -> ProduceOutcome {
        self.produce(request).await
    }

    async fn flush(&self) {
        match self.transport.flush(self.config.request_timeout).await {
            Ok(()) => info!("Kafka producer flushed"),
            Err(e) => warn!(error = %e, "Failed to flush Kafka producer"),
        }
    }
}

fn record_produce(topic: &str, outcome: &ProduceOutcome) {
    let result = match outcome {
        ProduceOutcome::Acknowledged(_) => "acknowledged",
        ProduceOutcome::Failed(failure) => failure.kind.as_str(),
    };
    let labels = [
        ("topic", topic.to_string()),
        ("outcome", result.to_string()),
    ];

    counter!("relay_produce_total", &labels).increment(1);
}
