use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gremesh_state::TunnelState;

mod commands;

#[derive(Parser)]
#[command(
    name = "gremesh",
    about = "gremesh: GRE tunnel mesh orchestrator tools",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or scaffold gremesh.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect the tunnel record store
    Tunnels {
        #[command(subcommand)]
        action: TunnelsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate a config file, then print the effective settings
    Check {
        /// Path to gremesh.toml
        path: PathBuf,
    },
    /// Print a config with every default filled in
    Default,
}

#[derive(Subcommand)]
enum TunnelsAction {
    /// List tunnel records
    List {
        /// Store file (default: [store].path from --config, or the built-in default)
        #[arg(short, long)]
        store: Option<PathBuf>,
        /// Read the store path from this config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Only records on this network
        #[arg(long)]
        network: Option<u64>,
        /// Only records with this host at either end
        #[arg(long)]
        host: Option<u64>,
        /// Only records in this state (pending, success, failed)
        #[arg(long)]
        state: Option<TunnelState>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// List records terminating at a host, i.e. the peers a teardown would contact
    Peers {
        #[arg(short, long)]
        store: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        host: u64,
        #[arg(long)]
        network: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gremesh=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Check { path } => commands::config::check(&path),
            ConfigAction::Default => commands::config::print_default(),
        },
        Commands::Tunnels { action } => match action {
            TunnelsAction::List {
                store,
                config,
                network,
                host,
                state,
                format,
            } => {
                let path = commands::tunnels::store_path(store, config.as_deref())?;
                let filter = commands::tunnels::Filter {
                    network,
                    host,
                    state,
                };
                commands::tunnels::list(&path, &filter, &format)
            }
            TunnelsAction::Peers {
                store,
                config,
                host,
                network,
            } => {
                let path = commands::tunnels::store_path(store, config.as_deref())?;
                commands::tunnels::peers(&path, host, network)
            }
        },
    }
}
