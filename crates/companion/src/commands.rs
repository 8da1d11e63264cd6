//! Command handlers
//!
//! Every handler writes its result to stdout and returns the process exit
//! code. Errors bubble up to `main`, which maps them to exit codes.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use companion_core::{
    analyze, config::Config, load_config, normalize, validate, Broker, DeadLetterTracer, Error,
    FieldTable, FieldValue, FlowSimulator, ManagementBroker, SimulationConfig, SimulationState,
    SimulationStore, TracingSink,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cli::{Cli, Commands, Format, SimulateArgs},
    input::{emit, load_topology},
};

const STATUS_POLL: Duration = Duration::from_millis(250);

pub async fn run(cli: Cli) -> Result<i32> {
    let format = cli.format;
    match cli.command {
        Commands::Validate { file } => {
            let report = validate(&load_topology(&file).await?);
            emit(&report, format)?;
            Ok(i32::from(!report.is_valid))
        }
        Commands::Normalize { file } => {
            emit(&normalize(&load_topology(&file).await?), format)?;
            Ok(0)
        }
        Commands::Analyze { file, min_severity } => {
            let findings: Vec<_> = analyze(&load_topology(&file).await?)
                .into_iter()
                .filter(|f| f.severity >= min_severity)
                .collect();
            emit(&findings, format)?;
            Ok(0)
        }
        Commands::FetchTopology => {
            let (_, broker) = connect().await?;
            emit(&broker.current_topology().await?, format)?;
            Ok(0)
        }
        Commands::Health => health(format).await,
        Commands::Simulate(args) => simulate(args, format).await,
        Commands::DeadLetters { queue, limit } => {
            let tracer = tracer().await?;
            let cancel = interrupt_token();
            emit(
                &tracer
                    .dead_lettered_messages(queue.as_deref(), limit, &cancel)
                    .await?,
                format,
            )?;
            Ok(0)
        }
        Commands::Trace { message_id, queue } => {
            let tracer = tracer().await?;
            let cancel = interrupt_token();
            emit(
                &tracer.trace(&message_id, queue.as_deref(), &cancel).await?,
                format,
            )?;
            Ok(0)
        }
        Commands::Requeue { message_id } => {
            let cancel = interrupt_token();
            tracer().await?.requeue(&message_id, &cancel).await?;
            emit(&Requeued { message_id, requeued: true }, format)?;
            Ok(0)
        }
    }
}

#[derive(Serialize)]
struct Requeued {
    message_id: String,
    requeued: bool,
}

#[derive(Serialize)]
struct Health {
    management_url: String,
    healthy: bool,
}

/// Token cancelled on ctrl-c.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling broker scan");
            trigger.cancel();
        }
    });
    token
}

async fn connect() -> Result<(Config, Arc<ManagementBroker>)> {
    let config = load_config().await?;
    let broker = Arc::new(ManagementBroker::new(&config.broker)?);
    Ok((config, broker))
}

async fn tracer() -> Result<DeadLetterTracer> {
    let (config, broker) = connect().await?;
    Ok(DeadLetterTracer::new(broker, config.tracer))
}

async fn health(format: Format) -> Result<i32> {
    let (config, broker) = connect().await?;
    let healthy = broker.health_check().await?;
    emit(
        &Health {
            management_url: config.broker.management_url,
            healthy,
        },
        format,
    )?;
    Ok(i32::from(!healthy) * 2)
}

fn simulation_config(args: SimulateArgs) -> SimulationConfig {
    let headers: FieldTable = args
        .headers
        .into_iter()
        .map(|(key, value)| (key, FieldValue::from(value)))
        .collect();
    SimulationConfig {
        message_size: args.size,
        concurrent_publishers: args.publishers,
        failure_rate: args.failure_rate,
        publish_rate_per_second: args.rate,
        headers,
        consume_queue: args.consume_queue,
        ..SimulationConfig::new(args.routing_key, args.count)
    }
}

/// Run a simulation to its end; ctrl-c stops it.
async fn simulate(args: SimulateArgs, format: Format) -> Result<i32> {
    let (config, broker) = connect().await?;
    let simulator = FlowSimulator::new(broker, Arc::new(TracingSink), SimulationStore::new())
        .with_limits(config.simulator);

    let id = simulator.start(simulation_config(args)).await?;
    let mut interval = tokio::time::interval(STATUS_POLL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let status = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for ctrl-c")?;
                info!(simulation_id = %id, "Interrupted, stopping simulation");
                simulator.stop(&id).await?;
                break simulator.status(&id).await?;
            }
            _ = interval.tick() => {
                let status = simulator.status(&id).await?;
                if status.state.is_terminal() {
                    break status;
                }
            }
        }
    };

    emit(&status, format)?;
    if status.state == SimulationState::Failed {
        let reason = status.error.unwrap_or_default();
        return Err(Error::broker(format!("simulation {id} failed: {reason}")).into());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_config_from_args() {
        let args = SimulateArgs {
            routing_key: "orders.created".to_string(),
            count: 10,
            size: 32,
            publishers: 2,
            failure_rate: 0.25,
            rate: 5,
            consume_queue: Some("orders.all".to_string()),
            headers: vec![("tenant".to_string(), "acme".to_string())],
        };

        let config = simulation_config(args);
        assert_eq!(config.target_exchange(), "orders");
        assert_eq!(config.message_count, 10);
        assert_eq!(config.message_size, 32);
        assert_eq!(config.concurrent_publishers, 2);
        assert_eq!(config.publish_rate_per_second, 5);
        assert_eq!(config.headers.get_str("tenant"), Some("acme"));
        assert_eq!(config.consume_queue.as_deref(), Some("orders.all"));
    }
}
