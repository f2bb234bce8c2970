//! osbctl: operator CLI for the Open Service Broker core.
//!
//! ```text
//! osbctl init --catalog catalog.json
//! osbctl check --config broker.toml
//! osbctl catalog --config broker.toml --format json
//! osbctl instances --config broker.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "osbctl",
    about = "Open Service Broker core: operator tools",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a broker.toml scaffold
    Init {
        /// Directory to write broker.toml into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Catalog file the config points at
        #[arg(short, long, default_value = "catalog.json")]
        catalog: String,
    },
    /// Validate a broker config and the catalog it names
    Check {
        #[arg(short, long, default_value = "broker.toml")]
        config: PathBuf,
    },
    /// Print the catalog a broker would serve
    Catalog {
        #[arg(short, long, default_value = "broker.toml")]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// List instances and bindings in a persistent registry
    Instances {
        #[arg(short, long, default_value = "broker.toml")]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("osbctl=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { dir, catalog } => commands::config::init(&dir, &catalog),
        Commands::Check { config } => commands::config::check(&config),
        Commands::Catalog { config, format } => commands::catalog::show(&config, &format),
        Commands::Instances { config, format } => {
            commands::instances::list(&config, &format).await
        }
    }
}
