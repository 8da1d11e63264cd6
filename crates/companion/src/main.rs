//! Companion CLI - topology validation, analysis, flow simulation and
//! dead-letter tracing for RabbitMQ
//!
//! Binary name: `companion`
//!
//! Results go to stdout; logs go to stderr. Exit codes:
//! - 0: success
//! - 1: invalid input, configuration or topology
//! - 2: broker or I/O failure, or an interrupted scan
//! - 3: not found

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::process;

use clap::Parser;

mod cli;
mod commands;
mod input;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    let code = match commands::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {err:#}");
            }
            exit_code(&err)
        }
    };

    #[allow(clippy::exit)]
    process::exit(code);
}

/// Exit code of the first core error in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<companion_core::Error>())
        .map_or(1, companion_core::Error::exit_code)
}
