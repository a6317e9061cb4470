//! 记录来源
//!
//! `ConsumerRunner` 通过 `RecordSource` 拉取和提交，不直接依赖 rdkafka consumer。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use relay_config::TransportConfig;
use relay_errors::{AppError, AppResult};
use relay_ports::ConsumedRecord;
use tracing::{debug, info};

/// 单个订阅的记录来源
#[async_trait]
pub trait RecordSource: Send {
    /// 订阅 topic，从 broker 已提交的位置开始
    async fn subscribe(&mut self, topic: &str) -> Result<(), KafkaError>;

    /// 最多等待 `timeout`，没有记录时返回 `Ok(None)`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedRecord>, KafkaError>;

    /// 提交下一条要读取的位置（已处理记录的 `offset + 1`）
    async fn commit(
        &mut self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), KafkaError>;

    async fn unsubscribe(&mut self);
}

/// 基于 rdkafka `StreamConsumer` 的记录来源
pub struct KafkaRecordSource {
    consumer: Arc<StreamConsumer>,
    metadata_timeout: Duration,
    allow_auto_create_topics: bool,
}

impl KafkaRecordSource {
    pub fn new(config: &TransportConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();

        for (key, value) in config.consumer_entries() {
            client_config.set(&key, &value);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create Kafka consumer: {}", e)))?;

        info!(
            group_id = %config.consumer.group_id,
            bootstrap_servers = %config.bootstrap_servers_string(),
            "Kafka consumer created"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            metadata_timeout: config.request_timeout,
            allow_auto_create_topics: config.consumer.allow_auto_create_topics,
        })
    }

    /// 通过元数据确认 topic 存在
    async fn ensure_topic(&self, topic: &str) -> Result<(), KafkaError> {
        let consumer = Arc::clone(&self.consumer);
        let name = topic.to_string();
        let timeout = self.metadata_timeout;

        tokio::task::spawn_blocking(move || {
            let metadata = consumer.fetch_metadata(Some(name.as_str()), timeout)?;
            let found = metadata.topics().iter().find(|t| t.name() == name);

            match found {
                Some(t) => match t.error() {
                    Some(err) => Err(KafkaError::MetadataFetch(RDKafkaErrorCode::from(err))),
                    None if t.partitions().is_empty() => Err(KafkaError::MetadataFetch(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    )),
                    None => Ok(()),
                },
                None => Err(KafkaError::MetadataFetch(
                    RDKafkaErrorCode::UnknownTopicOrPartition,
                )),
            }
        })
        .await
        .unwrap_or(Err(KafkaError::Canceled))
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn subscribe(&mut self, topic: &str) -> Result<(), KafkaError> {
        if !self.allow_auto_create_topics {
            self.ensure_topic(topic).await?;
        }

        self.consumer.subscribe(&[topic])?;
        debug!(topic, "Kafka subscription registered");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedRecord>, KafkaError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(KafkaError::PartitionEOF(_))) => Ok(None),
            Ok(Err(e)) => Err(e),
            Ok(Ok(message)) => Ok(Some(to_record(&message))),
        }
    }

    async fn commit(
        &mut self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), KafkaError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .unwrap_or(Err(KafkaError::Canceled))
    }

    async fn unsubscribe(&mut self) {
        self.consumer.unsubscribe();
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message.timestamp().to_millis(),
    }
}
