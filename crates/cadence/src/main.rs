//! Cadence: retry-on-failure job scheduling
//!
//! Main binary with subcommands:
//! - `run`: Drive a simulated job on a cron schedule under the retry policy

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod run;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Retry-on-failure job scheduling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated job under the retry policy until Ctrl-C
    Run {
        /// Policy name, used as the listener name
        #[arg(long, env = "CADENCE_NAME", default_value = "cadence-retry")]
        name: String,

        /// Cron expression of the primary schedule (5 or 6 fields)
        #[arg(long, env = "CADENCE_CRON", default_value = "0 * * * * *")]
        cron: String,

        /// Time zone of the primary schedule as a UTC offset (e.g. +02:00)
        #[arg(long, env = "CADENCE_TIME_ZONE")]
        time_zone: Option<String>,

        /// Retries tolerated before falling back to the primary schedule
        #[arg(long, env = "CADENCE_MAX_RETRIES", default_value = "3")]
        max_retries: u32,

        /// Seconds to wait before each retry
        #[arg(long, env = "CADENCE_WAIT_INTERVAL", default_value = "10")]
        wait_interval: u32,

        /// Number of initial runs of the simulated job that fail
        #[arg(long, default_value = "2")]
        fail_first: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "cadence=info,cadence_retry=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            name,
            cron,
            time_zone,
            max_retries,
            wait_interval,
            fail_first,
        } => {
            run::run(
                &name,
                &cron,
                time_zone,
                max_retries,
                wait_interval,
                fail_first,
            )
            .await
        }
    }
}
