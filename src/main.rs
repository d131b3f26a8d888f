mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use importd::{observability, server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::run(args.address, args.config).await?,
        Commands::Prune(args) => {
            let report = server::prune(args.config).await?;
            info!(
                expired = report.status.expired,
                corrupt = report.status.corrupt,
                retained = report.status.retained,
                queue_entries = report.queue_entries,
                payloads_discarded = report.payloads_discarded,
                "Stores pruned"
            );
        }
    }

    Ok(())
}
