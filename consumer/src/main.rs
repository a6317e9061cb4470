//! Kafka Relay Consumer CLI
//!
//! ```bash
//! relay-consumer payments
//! KAFKA_ENV=aws MSK_BOOTSTRAP_SERVERS=b-1.example:9098 relay-consumer orders
//! relay-consumer --diagnose
//! ```

mod diagnose;
mod printer;

use std::process::ExitCode;

use anyhow::bail;
use clap::Parser;
use relay_adapter_kafka::{KafkaConsumerRunner, KafkaHealthChecker};
use relay_bootstrap::{
    Runtime, RuntimeConfig, ShutdownController, init_runtime, run_with_shutdown,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relay-consumer")]
#[command(about = "Consume records from a Kafka topic and print them")]
#[command(version)]
struct Cli {
    /// Topic to consume from
    #[arg(value_parser = parse_topic, required_unless_present = "diagnose")]
    topic: Option<String>,

    /// Check broker connectivity and list available topics, then exit
    #[arg(long, visible_alias = "list-topics", conflicts_with = "topic")]
    diagnose: bool,

    /// Directory containing relay.toml
    #[arg(long, env = "RELAY_CONFIG_DIR", default_value = "config")]
    config_dir: String,
}

fn parse_topic(raw: &str) -> Result<String, String> {
    let topic = raw.trim();
    if topic.is_empty() {
        return Err("Topic name cannot be empty".to_string());
    }
    Ok(topic.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Consumer failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = init_runtime(&RuntimeConfig {
        config_dir: cli.config_dir,
    })?;

    let shutdown = ShutdownController::new();
    shutdown.listen_for_signals();

    match cli.topic {
        Some(topic) => consume(runtime, &shutdown, topic).await,
        None => run_diagnostics(runtime, &shutdown).await,
    }
}

async fn run_diagnostics(runtime: Runtime, shutdown: &ShutdownController) -> anyhow::Result<()> {
    let checker = KafkaHealthChecker::new(&runtime.transport)?;

    info!("Running connection diagnostics");
    let Some(diagnosis) = run_with_shutdown(shutdown, checker.diagnose()).await else {
        bail!("Diagnostics interrupted");
    };

    println!("{}", diagnose::render(&runtime.transport, &diagnosis));

    if !diagnosis.healthy() {
        bail!("Kafka cluster is not reachable");
    }
    Ok(())
}

async fn consume(
    runtime: Runtime,
    shutdown: &ShutdownController,
    topic: String,
) -> anyhow::Result<()> {
    let mut runner = KafkaConsumerRunner::connect(runtime.transport, &topic)?
        .with_stop_token(shutdown.token());

    info!(topic = %topic, "Starting consumer");
    println!("\nConsumer started! Listening to topic: '{}'", topic);
    println!("Press Ctrl+C to stop the consumer\n");
    println!("{}", printer::SEPARATOR);

    let mut seq = 0;
    let total = runner
        .run(|record| {
            seq += 1;
            println!("{}", printer::render(seq, &record));
            async { Ok(()) }
        })
        .await?;

    println!("\nConsumer stopped");
    println!("Total messages consumed: {}", total);

    Ok(())
}
