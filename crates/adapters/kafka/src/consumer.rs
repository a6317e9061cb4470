//! Kafka Consumer
//!
//! 单订阅状态机：`Subscribing → Polling ⇄ Delivering → Closed`。
//! 调用方确认处理成功后才提交 offset（至少一次语义），
//! 未提交的记录在重新订阅后会再次投递，调用方必须保证幂等。

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use metrics::counter;
use rdkafka::error::KafkaError;
use relay_common::RetryPolicy;
use relay_config::TransportConfig;
use relay_errors::{AppError, AppResult};
use relay_ports::{ConsumedRecord, ErrorClass};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::outcome::{classify, is_topic_missing};
use crate::source::{KafkaRecordSource, RecordSource};

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Subscribing,
    Polling,
    /// 记录已交给调用方，等待提交
    Delivering,
    Closed,
}

/// Consumer 错误
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Broker unreachable after {attempts} attempt(s): {source}")]
    BrokerUnreachable { attempts: u32, source: KafkaError },

    #[error("Fatal transport error: {0}")]
    Fatal(#[source] KafkaError),

    #[error("Failed to commit {topic}/{partition}@{offset}: {source}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        source: KafkaError,
    },

    #[error("Handler failed at {topic}/{partition}@{offset}: {source}")]
    Handler {
        topic: String,
        partition: i32,
        offset: i64,
        source: AppError,
    },

    #[error("Consumer is closed")]
    Closed,
}

/// 确认一条记录后的提交动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// 可以提交到该 offset（含）
    Commit(i64),
    /// 更早投递的记录还未确认，暂不提交
    Deferred { behind: i64 },
    /// 不是本次订阅投递的记录
    Untracked,
}

#[derive(Debug, Clone, Default)]
struct PartitionOffsets {
    committed: Option<i64>,
    /// 已投递、未确认
    in_flight: BTreeSet<i64>,
    /// 已确认，但前面还有未确认的记录
    acknowledged: BTreeSet<i64>,
}

/// 每个 (topic, partition) 的提交位置
///
/// 只按投递顺序连续推进：提交位置永远不会越过未确认的记录。
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最后提交的 offset
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partition(topic, partition).and_then(|p| p.committed)
    }

    /// 已提交过的记录（重复投递）
    pub fn is_committed(&self, record: &ConsumedRecord) -> bool {
        self.committed(&record.topic, record.partition)
            .is_some_and(|offset| record.offset <= offset)
    }

    /// 最早的未确认 offset
    pub fn lowest_uncommitted(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partition(topic, partition)
            .and_then(|p| p.in_flight.first().copied())
    }

    /// 记录已交给调用方
    pub fn deliver(&mut self, record: &ConsumedRecord) {
        if self.is_committed(record) {
            return;
        }
        self.partitions
            .entry((record.topic.clone(), record.partition))
            .or_default()
            .in_flight
            .insert(record.offset);
    }

    /// 调用方确认记录，返回现在能提交到的位置
    pub fn acknowledge(&mut self, record: &ConsumedRecord) -> Acknowledgement {
        let Some(partition) = self
            .partitions
            .get_mut(&(record.topic.clone(), record.partition))
        else {
            return Acknowledgement::Untracked;
        };

        if !partition.in_flight.remove(&record.offset)
            && !partition.acknowledged.contains(&record.offset)
        {
            return Acknowledgement::Untracked;
        }
        partition.acknowledged.insert(record.offset);

        let gap = partition.in_flight.first().copied();
        let position = partition
            .acknowledged
            .iter()
            .copied()
            .take_while(|offset| gap.is_none_or(|gap| *offset < gap))
            .last();

        match (position, gap) {
            (Some(position), _) => Acknowledgement::Commit(position),
            (None, Some(behind)) => Acknowledgement::Deferred { behind },
            (None, None) => Acknowledgement::Untracked,
        }
    }

    /// broker 提交成功后推进，不会后退
    pub fn mark_committed(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        if state.committed.is_some_and(|committed| committed >= offset) {
            return;
        }
        state.committed = Some(offset);
        state.acknowledged.retain(|o| *o > offset);
        state.in_flight.retain(|o| *o > offset);
    }

    /// 丢弃未提交的投递，broker 会从提交位置重新投递
    pub fn reset_uncommitted(&mut self) {
        for state in self.partitions.values_mut() {
            state.in_flight.clear();
            state.acknowledged.clear();
        }
    }

    fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionOffsets> {
        self.partitions.get(&(topic.to_string(), partition))
    }
}

enum PollResult {
    Record(ConsumedRecord),
    Empty,
    Stopped,
    Failed(ConsumerError),
}

/// Consumer runner
///
/// 一个实例只服务一个逻辑 consumer，方法都需要 `&mut self`。
pub struct ConsumerRunner<S> {
    source: S,
    topic: String,
    poll_timeout: Duration,
    retry: RetryPolicy,
    state: ConsumerState,
    offsets: OffsetTracker,
    /// 本次订阅内每个分区最后投递的 offset
    delivered: HashMap<(String, i32), i64>,
    pending: Option<ConsumedRecord>,
    closing_error: Option<ConsumerError>,
    poll_failures: u32,
    stop: CancellationToken,
}

/// 生产环境使用的 runner
pub type KafkaConsumerRunner = ConsumerRunner<KafkaRecordSource>;

impl KafkaConsumerRunner {
    /// 创建 rdkafka consumer；订阅在第一次 `next_record` 时发生
    pub fn connect(config: Arc<TransportConfig>, topic: impl Into<String>) -> AppResult<Self> {
        let source = KafkaRecordSource::new(&config)?;
        Ok(Self::new(source, topic, &config))
    }
}

impl<S: RecordSource> ConsumerRunner<S> {
    pub fn new(source: S, topic: impl Into<String>, config: &TransportConfig) -> Self {
        Self {
            source,
            topic: topic.into(),
            poll_timeout: config.consumer.poll_timeout,
            retry: config.retry,
            state: ConsumerState::Subscribing,
            offsets: OffsetTracker::new(),
            delivered: HashMap::new(),
            pending: None,
            closing_error: None,
            poll_failures: 0,
            stop: CancellationToken::new(),
        }
    }

    /// 使用外部停止信号
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    /// 下一条记录
    ///
    /// 关闭后先返回一次关闭原因（如果有），之后一直返回 `None`。
    pub async fn next_record(&mut self) -> Option<Result<ConsumedRecord, ConsumerError>> {
        loop {
            if self.state != ConsumerState::Closed && self.stop.is_cancelled() {
                self.close(None).await;
            }

            match self.state {
                ConsumerState::Closed => return self.closing_error.take().map(Err),
                ConsumerState::Subscribing => {
                    if let Err(err) = self.subscribe().await {
                        self.close(Some(err)).await;
                    }
                }
                ConsumerState::Delivering => {
                    if let Some(record) = self.pending.take() {
                        warn!(
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            "Advancing without commit, later offsets stay uncommitted behind it"
                        );
                    }
                    self.state = ConsumerState::Polling;
                }
                ConsumerState::Polling => match self.poll_once().await {
                    PollResult::Record(record) => {
                        self.delivered
                            .insert((record.topic.clone(), record.partition), record.offset);
                        self.offsets.deliver(&record);
                        self.pending = Some(record.clone());
                        self.state = ConsumerState::Delivering;
                        counter!("relay_consumer_records_total", "topic" => record.topic.clone())
                            .increment(1);
                        return Some(Ok(record));
                    }
                    PollResult::Empty => {}
                    PollResult::Stopped => self.close(None).await,
                    PollResult::Failed(err) => self.close(Some(err)).await,
                },
            }
        }
    }

    /// 以 `Stream` 形式读取记录
    ///
    /// 拉取下一条之前会先提交上一条。
    pub fn records(&mut self) -> impl Stream<Item = Result<ConsumedRecord, ConsumerError>> + '_ {
        futures::stream::unfold(self, |runner| async move {
            if let Some(previous) = runner.pending.clone() {
                if let Err(err) = runner.commit(&previous).await {
                    runner.close(None).await;
                    return Some((Err(err), runner));
                }
            }
            runner.next_record().await.map(|item| (item, runner))
        })
    }

    /// 确认记录已处理并提交到 broker
    ///
    /// 提交位置只连续推进：更早投递的记录未确认时只记下确认，不提交。
    /// 低于已提交位置的提交是空操作。
    pub async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), ConsumerError> {
        if self.state == ConsumerState::Closed {
            return Err(ConsumerError::Closed);
        }

        if self.offsets.is_committed(record) {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Offset already committed"
            );
            self.finish_delivery(record);
            return Ok(());
        }

        let position = match self.offsets.acknowledge(record) {
            Acknowledgement::Commit(position) => position,
            Acknowledgement::Deferred { behind } => {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    behind,
                    "Commit deferred behind uncommitted offset"
                );
                self.finish_delivery(record);
                return Ok(());
            }
            Acknowledgement::Untracked => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Record was not delivered by this subscription, ignoring commit"
                );
                return Ok(());
            }
        };

        self.source
            .commit(&record.topic, record.partition, position + 1)
            .await
            .map_err(|source| ConsumerError::Commit {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: position,
                source,
            })?;

        self.offsets
            .mark_committed(&record.topic, record.partition, position);
        self.finish_delivery(record);

        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = position,
            "Offset committed"
        );
        counter!("relay_consumer_commits_total", "topic" => record.topic.clone()).increment(1);

        Ok(())
    }

    /// 停止订阅，已提交的 offset 不受影响
    pub async fn stop(&mut self) {
        self.stop.cancel();
        self.close(None).await;
    }

    /// 重新订阅，从 broker 已提交的位置继续
    ///
    /// 停止信号已触发时会换成新的 token，需要重新获取 `stop_token()`。
    pub async fn resubscribe(&mut self) {
        if self.state != ConsumerState::Closed {
            self.source.unsubscribe().await;
        }
        if self.stop.is_cancelled() {
            self.stop = CancellationToken::new();
        }

        self.delivered.clear();
        self.offsets.reset_uncommitted();
        self.pending = None;
        self.closing_error = None;
        self.poll_failures = 0;
        self.state = ConsumerState::Subscribing;

        info!(topic = %self.topic, "Resubscribing");
    }

    /// 逐条交给 handler，成功后提交
    ///
    /// handler 失败时不提交该记录并关闭订阅；返回已处理的条数。
    pub async fn run<F, Fut>(&mut self, mut handler: F) -> Result<u64, ConsumerError>
    where
        F: FnMut(ConsumedRecord) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let mut handled = 0;

        while let Some(next) = self.next_record().await {
            let record = next?;

            if let Err(source) = handler(record.clone()).await {
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %source,
                    "Handler failed, record left uncommitted"
                );
                self.close(None).await;
                return Err(ConsumerError::Handler {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    source,
                });
            }

            self.commit(&record).await?;
            handled += 1;
        }

        Ok(handled)
    }

    async fn subscribe(&mut self) -> Result<(), ConsumerError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Ok(()),
                result = self.source.subscribe(&self.topic) => result,
            };

            let err = match result {
                Ok(()) => {
                    info!(topic = %self.topic, attempt, "Subscribed");
                    self.state = ConsumerState::Polling;
                    return Ok(());
                }
                Err(err) => err,
            };

            if is_topic_missing(&err) {
                return Err(ConsumerError::TopicNotFound {
                    topic: self.topic.clone(),
                });
            }

            match classify(&err) {
                ErrorClass::Retryable if attempt < max_attempts => {
                    warn!(
                        topic = %self.topic,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Subscribe failed, retrying"
                    );
                    if !self.backoff(attempt).await {
                        return Ok(());
                    }
                }
                ErrorClass::Retryable => {
                    return Err(ConsumerError::BrokerUnreachable {
                        attempts: attempt,
                        source: err,
                    });
                }
                ErrorClass::Terminal | ErrorClass::Unknown => {
                    return Err(ConsumerError::Fatal(err));
                }
            }
        }
    }

    async fn poll_once(&mut self) -> PollResult {
        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return PollResult::Stopped,
            result = self.source.poll(self.poll_timeout) => result,
        };

        match result {
            Ok(Some(record)) => {
                self.poll_failures = 0;
                if self.is_duplicate(&record) {
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        "Skipping duplicate record"
                    );
                    return PollResult::Empty;
                }
                PollResult::Record(record)
            }
            Ok(None) => {
                self.poll_failures = 0;
                debug!(topic = %self.topic, "Empty poll");
                PollResult::Empty
            }
            Err(err) if is_topic_missing(&err) => PollResult::Failed(ConsumerError::TopicNotFound {
                topic: self.topic.clone(),
            }),
            Err(err) => match classify(&err) {
                ErrorClass::Retryable => {
                    self.poll_failures += 1;
                    let max_attempts = self.retry.max_attempts();
                    if self.poll_failures >= max_attempts {
                        return PollResult::Failed(ConsumerError::BrokerUnreachable {
                            attempts: self.poll_failures,
                            source: err,
                        });
                    }
                    warn!(
                        topic = %self.topic,
                        attempt = self.poll_failures,
                        max_attempts,
                        error = %err,
                        "Poll failed, retrying"
                    );
                    if self.backoff(self.poll_failures).await {
                        PollResult::Empty
                    } else {
                        PollResult::Stopped
                    }
                }
                ErrorClass::Terminal | ErrorClass::Unknown => {
                    PollResult::Failed(ConsumerError::Fatal(err))
                }
            },
        }
    }

    /// 等待退避时间；被停止时返回 false
    async fn backoff(&self, attempt: u32) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(self.retry.delay_for_attempt(attempt)) => true,
        }
    }

    /// 已提交，或本次订阅已投递过（仍在 tracker 中，不会被越过提交）
    fn is_duplicate(&self, record: &ConsumedRecord) -> bool {
        self.offsets.is_committed(record)
            || self
                .delivered
                .get(&(record.topic.clone(), record.partition))
                .is_some_and(|offset| record.offset <= *offset)
    }

    fn finish_delivery(&mut self, record: &ConsumedRecord) {
        let matches = self.pending.as_ref().is_some_and(|pending| {
            pending.topic_partition() == record.topic_partition()
                && pending.offset == record.offset
        });
        if matches {
            self.pending = None;
            self.state = ConsumerState::Polling;
        }
    }

    async fn close(&mut self, err: Option<ConsumerError>) {
        if self.state == ConsumerState::Closed {
            return;
        }

        self.source.unsubscribe().await;
        self.state = ConsumerState::Closed;
        self.pending = None;

        match &err {
            Some(e) => error!(topic = %self.topic, error = %e, "Consumer closed with error"),
            None => info!(topic = %self.topic, "Consumer stopped"),
        }
        self.closing_error = err;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::StreamExt;
    use rdkafka::error::RDKafkaErrorCode;
    use relay_config::{Environment, TransportOverrides, resolve};

    use super::*;

    /// 内存 broker：按日志顺序返回记录，提交位置为 `offset + 1`
    #[derive(Default)]
    struct Broker {
        topics: Vec<String>,
        log: Vec<ConsumedRecord>,
        committed: HashMap<i32, i64>,
        position: HashMap<i32, i64>,
        subscribe_errors: VecDeque<KafkaError>,
        poll_errors: VecDeque<KafkaError>,
        polls: usize,
        commits: usize,
    }

    struct FakeSource {
        broker: Arc<Mutex<Broker>>,
    }

    #[async_trait::async_trait]
    impl RecordSource for FakeSource {
        async fn subscribe(&mut self, topic: &str) -> Result<(), KafkaError> {
            let mut broker = self.broker.lock().unwrap();
            if let Some(err) = broker.subscribe_errors.pop_front() {
                return Err(err);
            }
            if !broker.topics.iter().any(|t| t == topic) {
                return Err(KafkaError::MetadataFetch(
                    RDKafkaErrorCode::UnknownTopicOrPartition,
                ));
            }
            broker.position = broker.committed.clone();
            Ok(())
        }

        async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedRecord>, KafkaError> {
            let next = {
                let mut broker = self.broker.lock().unwrap();
                broker.polls += 1;
                if let Some(err) = broker.poll_errors.pop_front() {
                    return Err(err);
                }
                let next = broker
                    .log
                    .iter()
                    .find(|r| r.offset >= broker.position.get(&r.partition).copied().unwrap_or(0))
                    .cloned();
                if let Some(record) = &next {
                    broker.position.insert(record.partition, record.offset + 1);
                }
                next
            };

            if next.is_none() {
                tokio::time::sleep(timeout).await;
            }
            Ok(next)
        }

        async fn commit(
            &mut self,
            _topic: &str,
            partition: i32,
            next_offset: i64,
        ) -> Result<(), KafkaError> {
            let mut broker = self.broker.lock().unwrap();
            broker.commits += 1;
            broker.committed.insert(partition, next_offset);
            Ok(())
        }

        async fn unsubscribe(&mut self) {}
    }

    fn record(partition: i32, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: "orders".to_string(),
            partition,
            offset,
            key: None,
            payload: format!("order-{}-{}", partition, offset).into_bytes(),
            timestamp: Some(1_700_000_000_000),
        }
    }

    fn broker(log: Vec<ConsumedRecord>) -> Arc<Mutex<Broker>> {
        Arc::new(Mutex::new(Broker {
            topics: vec!["orders".to_string()],
            log,
            ..Default::default()
        }))
    }

    fn runner(broker: &Arc<Mutex<Broker>>) -> ConsumerRunner<FakeSource> {
        let config = resolve(Environment::Local, &TransportOverrides::default()).unwrap();
        ConsumerRunner::new(
            FakeSource {
                broker: Arc::clone(broker),
            },
            "orders",
            &config,
        )
    }

    #[tokio::test]
    async fn test_offsets_strictly_increasing_per_partition() {
        let broker = broker(vec![
            record(0, 0),
            record(1, 0),
            record(0, 1),
            record(1, 1),
            record(0, 2),
        ]);
        let mut runner = runner(&broker);

        let mut last: HashMap<i32, i64> = HashMap::new();
        for _ in 0..5 {
            let rec = runner.next_record().await.unwrap().unwrap();
            assert_eq!(runner.state(), ConsumerState::Delivering);
            if let Some(previous) = last.insert(rec.partition, rec.offset) {
                assert!(rec.offset > previous);
            }
            runner.commit(&rec).await.unwrap();
            assert_eq!(runner.state(), ConsumerState::Polling);
        }

        assert_eq!(runner.offsets().committed("orders", 0), Some(2));
        assert_eq!(runner.offsets().committed("orders", 1), Some(1));
        let broker = broker.lock().unwrap();
        assert_eq!(broker.committed.get(&0), Some(&3));
        assert_eq!(broker.committed.get(&1), Some(&2));
    }

    #[tokio::test]
    async fn test_uncommitted_record_redelivered_after_resubscribe() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);

        let first = runner.next_record().await.unwrap().unwrap();
        runner.commit(&first).await.unwrap();
        let second = runner.next_record().await.unwrap().unwrap();
        assert_eq!(second.offset, 1);

        runner.stop().await;
        assert_eq!(runner.state(), ConsumerState::Closed);
        assert!(runner.next_record().await.is_none());
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&1));

        runner.resubscribe().await;
        let again = runner.next_record().await.unwrap().unwrap();
        assert!(again.offset <= second.offset);
        assert_eq!(again.offset, 1);
    }

    #[tokio::test]
    async fn test_topic_not_found_closes() {
        let broker = broker(vec![]);
        broker.lock().unwrap().topics.clear();
        let mut runner = runner(&broker);

        let err = runner.next_record().await.unwrap().unwrap_err();
        assert!(matches!(err, ConsumerError::TopicNotFound { ref topic } if topic == "orders"));
        assert_eq!(runner.state(), ConsumerState::Closed);
        assert!(runner.next_record().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_topic_keeps_polling_until_stopped() {
        let broker = broker(vec![]);
        let mut runner = runner(&broker);
        let token = runner.stop_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            token.cancel();
        });

        assert!(runner.next_record().await.is_none());
        assert_eq!(runner.state(), ConsumerState::Closed);
        assert!(broker.lock().unwrap().polls >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_committed_offsets() {
        let broker = broker(vec![record(0, 0)]);
        let token = CancellationToken::new();
        let mut runner = runner(&broker).with_stop_token(token.clone());

        let rec = runner.next_record().await.unwrap().unwrap();
        runner.commit(&rec).await.unwrap();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        });
        assert!(runner.next_record().await.is_none());
        stopper.await.unwrap();

        assert_eq!(runner.offsets().committed("orders", 0), Some(0));
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&1));
        assert!(matches!(
            runner.commit(&rec).await,
            Err(ConsumerError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_recover() {
        let broker = broker(vec![record(0, 0)]);
        broker.lock().unwrap().poll_errors = VecDeque::from([
            KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
            KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown),
        ]);
        let mut runner = runner(&broker);

        let rec = runner.next_record().await.unwrap().unwrap();
        assert_eq!(rec.offset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_unreachable_beyond_budget() {
        let broker = broker(vec![record(0, 0)]);
        broker.lock().unwrap().poll_errors = (0..4)
            .map(|_| KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown))
            .collect();
        let mut runner = runner(&broker);

        let err = runner.next_record().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::BrokerUnreachable { attempts: 4, .. }
        ));
        assert_eq!(runner.state(), ConsumerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_retries_transient_errors() {
        let broker = broker(vec![record(0, 0)]);
        broker.lock().unwrap().subscribe_errors = VecDeque::from([KafkaError::MetadataFetch(
            RDKafkaErrorCode::BrokerTransportFailure,
        )]);
        let mut runner = runner(&broker);

        assert!(runner.next_record().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_authorization_failure_is_fatal() {
        let broker = broker(vec![record(0, 0)]);
        broker.lock().unwrap().poll_errors = VecDeque::from([KafkaError::MessageConsumption(
            RDKafkaErrorCode::TopicAuthorizationFailed,
        )]);
        let mut runner = runner(&broker);

        let err = runner.next_record().await.unwrap().unwrap_err();
        assert!(matches!(err, ConsumerError::Fatal(_)));
        assert!(runner.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_skipped_record_redelivered_after_resubscribe() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);

        let skipped = runner.next_record().await.unwrap().unwrap();
        let later = runner.next_record().await.unwrap().unwrap();
        assert_eq!((skipped.offset, later.offset), (0, 1));

        runner.commit(&later).await.unwrap();
        assert_eq!(broker.lock().unwrap().commits, 0);
        assert_eq!(runner.offsets().committed("orders", 0), None);
        assert_eq!(runner.offsets().lowest_uncommitted("orders", 0), Some(0));

        runner.stop().await;
        runner.resubscribe().await;

        let again = runner.next_record().await.unwrap().unwrap();
        assert_eq!(again.offset, 0);
    }

    #[tokio::test]
    async fn test_commit_waits_for_earlier_records() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);

        let first = runner.next_record().await.unwrap().unwrap();
        let second = runner.next_record().await.unwrap().unwrap();
        let third = runner.next_record().await.unwrap().unwrap();

        runner.commit(&second).await.unwrap();
        assert_eq!(broker.lock().unwrap().commits, 0);

        runner.commit(&first).await.unwrap();
        assert_eq!(runner.offsets().committed("orders", 0), Some(1));
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&2));

        // 重复提交是空操作
        runner.commit(&first).await.unwrap();
        runner.commit(&second).await.unwrap();
        assert_eq!(broker.lock().unwrap().commits, 1);

        runner.commit(&third).await.unwrap();
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&3));
        assert_eq!(broker.lock().unwrap().commits, 2);
    }

    #[tokio::test]
    async fn test_commit_of_previous_subscription_ignored() {
        let broker = broker(vec![record(0, 0), record(0, 1)]);
        let mut runner = runner(&broker);

        let stale = runner.next_record().await.unwrap().unwrap();
        runner.resubscribe().await;
        runner.commit(&stale).await.unwrap();

        assert_eq!(broker.lock().unwrap().commits, 0);
        let again = runner.next_record().await.unwrap().unwrap();
        assert_eq!(again.offset, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_handler_error_without_commit() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);

        let result = runner
            .run(|rec| async move {
                if rec.offset == 1 {
                    Err(AppError::internal("handler exploded"))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ConsumerError::Handler { offset: 1, .. })
        ));
        assert_eq!(runner.state(), ConsumerState::Closed);
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);
        let token = runner.stop_token();

        let handled = runner
            .run(|rec| {
                if rec.offset == 2 {
                    token.cancel();
                }
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(handled, 3);
        assert_eq!(broker.lock().unwrap().committed.get(&0), Some(&3));
    }

    #[tokio::test]
    async fn test_stream_commits_previous_record() {
        let broker = broker(vec![record(0, 0), record(0, 1), record(0, 2)]);
        let mut runner = runner(&broker);

        {
            let mut records = Box::pin(runner.records());
            for expected in 0..3 {
                let rec = records.next().await.unwrap().unwrap();
                assert_eq!(rec.offset, expected);
            }
        }

        assert_eq!(runner.offsets().committed("orders", 0), Some(1));
        assert_eq!(runner.state(), ConsumerState::Delivering);
    }

    #[test]
    fn test_offset_tracker_commits_contiguously() {
        let mut tracker = OffsetTracker::new();
        for offset in 4..8 {
            tracker.deliver(&record(0, offset));
        }

        assert_eq!(
            tracker.acknowledge(&record(0, 6)),
            Acknowledgement::Deferred { behind: 4 }
        );
        assert_eq!(tracker.acknowledge(&record(0, 4)), Acknowledgement::Commit(4));
        tracker.mark_committed("orders", 0, 4);
        assert_eq!(tracker.acknowledge(&record(0, 5)), Acknowledgement::Commit(6));
        tracker.mark_committed("orders", 0, 6);

        assert!(tracker.is_committed(&record(0, 6)));
        assert!(!tracker.is_committed(&record(0, 7)));
        assert!(!tracker.is_committed(&record(1, 0)));
        assert_eq!(tracker.lowest_uncommitted("orders", 0), Some(7));

        tracker.mark_committed("orders", 0, 2);
        assert_eq!(tracker.committed("orders", 0), Some(6));

        assert_eq!(tracker.acknowledge(&record(1, 0)), Acknowledgement::Untracked);
        tracker.reset_uncommitted();
        assert_eq!(tracker.acknowledge(&record(0, 7)), Acknowledgement::Untracked);
        assert_eq!(tracker.committed("orders", 0), Some(6));
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_kafka_runner() {
        let config = resolve(Environment::Local, &TransportOverrides::default()).unwrap();
        let mut runner = KafkaConsumerRunner::connect(Arc::new(config), "test-topic").unwrap();
        let token = runner.stop_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        runner.run(|_| async { Ok(()) }).await.unwrap();
    }
}
