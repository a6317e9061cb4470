//! 投递结果分类
//!
//! 传输层错误只在这里分类一次，producer 和 consumer 都以此决定是否重试。

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use relay_ports::{ErrorClass, FailureKind};

/// 错误分类
pub fn classify(error: &KafkaError) -> ErrorClass {
    match error {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => ErrorClass::Terminal,
        KafkaError::Canceled => ErrorClass::Unknown,
        _ => match error.rdkafka_error_code() {
            Some(code) => classify_code(code),
            None => ErrorClass::Unknown,
        },
    }
}

/// 按错误码分类
pub fn classify_code(code: RDKafkaErrorCode) -> ErrorClass {
    use RDKafkaErrorCode::*;

    match code {
        BrokerNotAvailable
        | AllBrokersDown
        | BrokerTransportFailure
        | NetworkException
        | RequestTimedOut
        | MessageTimedOut
        | OperationTimedOut
        | LeaderNotAvailable
        | NotLeaderForPartition
        | QueueFull
        | NotEnoughReplicas
        | NotEnoughReplicasAfterAppend
        | CoordinatorLoadInProgress
        | CoordinatorNotAvailable
        | NotCoordinator
        | RebalanceInProgress
        | Resolve => ErrorClass::Retryable,

        SaslAuthenticationFailed
        | Authentication
        | TopicAuthorizationFailed
        | GroupAuthorizationFailed
        | ClusterAuthorizationFailed
        | InvalidConfig
        | InvalidRequest
        | UnsupportedVersion
        | MessageSizeTooLarge
        | InvalidMessage
        | InvalidMessageSize
        | InvalidRecord
        | InvalidTopic
        | UnknownTopic
        | UnknownTopicOrPartition
        | UnknownPartition
        | KeySerialization
        | ValueSerialization
        | PolicyViolation
        | InvalidArgument => ErrorClass::Terminal,

        _ => ErrorClass::Unknown,
    }
}

/// 失败类型，供调用方区分“重试耗尽”和“被明确拒绝”
pub fn failure_kind(error: &KafkaError) -> FailureKind {
    use RDKafkaErrorCode::*;

    let Some(code) = error.rdkafka_error_code() else {
        return FailureKind::Rejected;
    };

    match code {
        BrokerNotAvailable | AllBrokersDown | BrokerTransportFailure | NetworkException
        | Resolve | LeaderNotAvailable | NotLeaderForPartition => FailureKind::BrokerUnavailable,
        RequestTimedOut | MessageTimedOut | OperationTimedOut => FailureKind::Timeout,
        UnknownTopic | UnknownTopicOrPartition => FailureKind::TopicNotFound,
        SaslAuthenticationFailed
        | Authentication
        | TopicAuthorizationFailed
        | GroupAuthorizationFailed
        | ClusterAuthorizationFailed => FailureKind::Unauthorized,
        _ => FailureKind::Rejected,
    }
}

/// topic 不存在
pub fn is_topic_missing(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::UnknownTopic | RDKafkaErrorCode::UnknownTopicOrPartition)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produce_error(code: RDKafkaErrorCode) -> KafkaError {
        KafkaError::MessageProduction(code)
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        for code in [
            RDKafkaErrorCode::AllBrokersDown,
            RDKafkaErrorCode::BrokerTransportFailure,
            RDKafkaErrorCode::MessageTimedOut,
            RDKafkaErrorCode::RequestTimedOut,
            RDKafkaErrorCode::QueueFull,
            RDKafkaErrorCode::NotLeaderForPartition,
        ] {
            assert_eq!(
                classify(&produce_error(code)),
                ErrorClass::Retryable,
                "{code:?}"
            );
        }
    }

    #[test]
    fn test_terminal_errors() {
        for code in [
            RDKafkaErrorCode::TopicAuthorizationFailed,
            RDKafkaErrorCode::SaslAuthenticationFailed,
            RDKafkaErrorCode::MessageSizeTooLarge,
            RDKafkaErrorCode::InvalidRecord,
            RDKafkaErrorCode::UnknownTopicOrPartition,
            RDKafkaErrorCode::ValueSerialization,
        ] {
            assert_eq!(
                classify(&produce_error(code)),
                ErrorClass::Terminal,
                "{code:?}"
            );
        }

        assert_eq!(
            classify(&KafkaError::ClientCreation("bad config".to_string())),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_unclassified_is_unknown_and_not_retried() {
        let class = classify(&produce_error(RDKafkaErrorCode::DuplicateSequenceNumber));
        assert_eq!(class, ErrorClass::Unknown);
        assert!(!class.should_retry());
        assert!(!classify(&KafkaError::Canceled).should_retry());
    }

    #[test]
    fn test_partition_eof_is_not_special_cased() {
        // EOF 在记录来源里已当作空轮询处理
        let eof = KafkaError::PartitionEOF(0);
        assert_eq!(classify(&eof), ErrorClass::Unknown);
        assert_eq!(failure_kind(&eof), FailureKind::Rejected);
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            failure_kind(&produce_error(RDKafkaErrorCode::AllBrokersDown)),
            FailureKind::BrokerUnavailable
        );
        assert_eq!(
            failure_kind(&produce_error(RDKafkaErrorCode::MessageTimedOut)),
            FailureKind::Timeout
        );
        assert_eq!(
            failure_kind(&produce_error(RDKafkaErrorCode::UnknownTopicOrPartition)),
            FailureKind::TopicNotFound
        );
        assert_eq!(
            failure_kind(&produce_error(RDKafkaErrorCode::TopicAuthorizationFailed)),
            FailureKind::Unauthorized
        );
        assert_eq!(
            failure_kind(&produce_error(RDKafkaErrorCode::InvalidRecord)),
            FailureKind::Rejected
        );
        assert_eq!(failure_kind(&KafkaError::Canceled), FailureKind::Rejected);
    }

    #[test]
    fn test_topic_missing() {
        assert!(is_topic_missing(&KafkaError::MetadataFetch(
            RDKafkaErrorCode::UnknownTopicOrPartition
        )));
        assert!(!is_topic_missing(&KafkaError::Subscription(
            "unknown".to_string()
        )));
        assert!(!is_topic_missing(&produce_error(
            RDKafkaErrorCode::AllBrokersDown
        )));
    }
}
