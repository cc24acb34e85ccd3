use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transfer_engine::server;

#[derive(Parser)]
#[command(name = "transfer-engine")]
#[command(about = "Process internal transfers and external withdrawals")]
enum Cli {
    /// Run the TCP front end
    #[command(name = "server")]
    Server {
        #[arg(long, default_value = "0.0.0.0:7000")]
        bind: String,
        /// Directory for the account/withdrawal/report journals
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Reconciliation tick in milliseconds
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,
        #[arg(long, default_value = "1000")]
        max_connections: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match Cli::parse() {
        Cli::Server {
            bind,
            data_dir,
            poll_interval_ms,
            max_connections,
        } => {
            server::run(
                bind,
                data_dir,
                Duration::from_millis(poll_interval_ms),
                max_connections,
            )
            .await
        }
    }
}
