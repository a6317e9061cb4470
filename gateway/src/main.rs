//! Kafka Relay HTTP Gateway

mod routing;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use relay_adapter_kafka::KafkaProducerGateway;
use relay_bootstrap::{RuntimeConfig, init_runtime, shutdown_signal};
use relay_ports::MessagePublisher;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::{AppState, KafkaBrokerProbe};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runtime = init_runtime(&RuntimeConfig::default())?;
    let transport = runtime.transport;

    let publisher: Arc<dyn MessagePublisher> =
        Arc::new(KafkaProducerGateway::connect(Arc::clone(&transport))?);

    let state = AppState {
        publisher: Arc::clone(&publisher),
        probe: Arc::new(KafkaBrokerProbe::new(&transport)?),
        transport,
    };

    let app = routing::api_routes(state).layer(TraceLayer::new_for_http());

    let server = &runtime.settings.server;
    let addr: SocketAddr = format!("{}:{}", server.http_host, server.http_port)
        .parse()
        .context("Invalid listen address")?;

    info!(%addr, "Starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    publisher.flush().await;
    info!("Gateway stopped");

    Ok(())
}
