use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "importd")]
#[command(about = "CSV import pipeline with live progress over WebSocket", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API, worker pool and WebSocket gateway
    Serve(ServeArgs),
    /// Delete expired or corrupt job status records and exit
    Prune(PruneArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Configuration file (defaults to $IMPORTD_CONFIG or config/importd.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct PruneArgs {
    /// Configuration file (defaults to $IMPORTD_CONFIG or config/importd.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
