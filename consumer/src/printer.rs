//! 记录输出格式

use std::fmt::Write;

use relay_ports::ConsumedRecord;
use serde_json::Value;

pub const SEPARATOR: &str =
    "------------------------------------------------------------";

fn field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

/// 按序号渲染一条记录
pub fn render(seq: u64, record: &ConsumedRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Message #{}", seq);
    let _ = writeln!(out, "   Topic: {}", record.topic);
    let _ = writeln!(out, "   Partition: {}", record.partition);
    let _ = writeln!(out, "   Offset: {}", record.offset);
    if let Some(key) = record.key_text() {
        let _ = writeln!(out, "   Key: {}", key);
    }

    // gateway 写入的 JSON 信封，字段都可能缺失
    match serde_json::from_slice::<Value>(&record.payload) {
        Ok(Value::Object(envelope)) => {
            let _ = writeln!(out, "   Timestamp: {}", field(envelope.get("timestamp")));
            let _ = writeln!(out, "   Environment: {}", field(envelope.get("environment")));
            let _ = writeln!(out, "   Content: {}", field(envelope.get("message")));
        }
        _ => {
            let _ = writeln!(out, "   Content: {}", record.payload_text());
        }
    }

    out.push_str(SEPARATOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &[u8]) -> ConsumedRecord {
        ConsumedRecord {
            topic: "payments".to_string(),
            partition: 0,
            offset: 3,
            key: None,
            payload: payload.to_vec(),
            timestamp: None,
        }
    }

    #[test]
    fn test_render_envelope() {
        let out = render(
            1,
            &record(
                br#"{"message":"Test payment","timestamp":"2024-01-01T00:00:00Z","environment":"local"}"#,
            ),
        );

        assert!(out.starts_with("Message #1\n"));
        assert!(out.contains("   Offset: 3\n"));
        assert!(out.contains("   Timestamp: 2024-01-01T00:00:00Z\n"));
        assert!(out.contains("   Environment: local\n"));
        assert!(out.contains("   Content: Test payment\n"));
        assert!(out.ends_with(SEPARATOR));
    }

    #[test]
    fn test_render_partial_envelope() {
        let out = render(2, &record(br#"{"message":42}"#));

        assert!(out.contains("   Timestamp: N/A\n"));
        assert!(out.contains("   Content: 42\n"));
    }

    #[test]
    fn test_render_plain_text() {
        let out = render(3, &record(b"hello world"));

        assert!(out.contains("   Content: hello world\n"));
        assert!(!out.contains("Timestamp"));
        assert!(!out.contains("Key"));
    }

    #[test]
    fn test_render_key() {
        let mut rec = record(b"hello");
        rec.key = Some(b"order-123".to_vec());

        let out = render(4, &rec);
        assert!(out.contains("   Offset: 3\n   Key: order-123\n"));
    }
}
