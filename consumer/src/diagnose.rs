//! 连接诊断输出

use std::fmt::Write;

use relay_adapter_kafka::ClusterDiagnosis;
use relay_config::TransportConfig;

use crate::printer::SEPARATOR;

/// 渲染诊断报告
pub fn render(transport: &TransportConfig, diagnosis: &ClusterDiagnosis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Kafka connection diagnostics");
    let _ = writeln!(out, "{}", SEPARATOR);
    let _ = writeln!(out, "Environment: {}", transport.environment);
    let _ = writeln!(out, "Security: {}", transport.security);
    let _ = writeln!(out);

    let _ = writeln!(out, "TCP connectivity:");
    for check in &diagnosis.endpoints {
        match (&check.error, check.latency_ms) {
            (None, Some(ms)) => {
                let _ = writeln!(out, "   OK    {} ({}ms)", check.endpoint, ms);
            }
            (None, None) => {
                let _ = writeln!(out, "   OK    {}", check.endpoint);
            }
            (Some(e), _) => {
                let _ = writeln!(out, "   FAIL  {}: {}", check.endpoint, e);
            }
        }
    }
    let _ = writeln!(out);

    let broker = &diagnosis.broker;
    if broker.healthy {
        let _ = writeln!(
            out,
            "Cluster metadata: {} broker(s), {} topic(s), {}ms",
            broker.broker_count,
            broker.topic_count,
            broker.latency_ms.unwrap_or_default()
        );
        if diagnosis.topics.is_empty() {
            let _ = writeln!(out, "No topics found");
        } else {
            let _ = writeln!(out, "Available topics:");
            for topic in &diagnosis.topics {
                let _ = writeln!(
                    out,
                    "   - {} ({} partition(s))",
                    topic.name, topic.partition_count
                );
            }
        }
    } else {
        let _ = writeln!(
            out,
            "Cluster metadata unavailable: {}",
            broker.error.as_deref().unwrap_or("unknown error")
        );
        let _ = writeln!(out, "Check that the brokers are running and the listeners");
        let _ = writeln!(out, "match KAFKA_ENV and the bootstrap servers above.");
    }

    out.push_str(SEPARATOR);
    out
}
