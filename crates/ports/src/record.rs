//! 消费到的记录

use serde::Serialize;

/// 从 broker 拉取到的一条记录，交给调用方后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    /// 分区内单调递增
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// 毫秒时间戳
    pub timestamp: Option<i64>,
}

impl ConsumedRecord {
    /// 以 UTF-8 读取负载（非法字节替换为 U+FFFD）
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn key_text(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    /// (topic, partition) 二元组
    pub fn topic_partition(&self) -> (&str, i32) {
        (&self.topic, self.partition)
    }
}
