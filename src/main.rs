mod api;
mod client;
mod commands;
mod config;
mod domain;
mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fleetgate",
    version,
    about = "Upgrade readiness checks and upgrade gating for a cloud control plane"
)]
struct Cli {
    /// Path to config file (default: ~/.config/fleetgate/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (table or json)
    #[arg(long, global = true, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fleetgate daemon (REST + GraphQL)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,

        /// Inventory file (overrides config)
        #[arg(long)]
        inventory: Option<String>,
    },

    /// Installed version, deployed add-ons and upgrade phase
    Status,

    /// Run readiness checks against the inventory (all of them by default)
    Check {
        /// A single check, e.g. ha_config
        name: Option<String>,

        /// Persist the full report where the daemon serves it from
        #[arg(long, conflicts_with = "name")]
        save: bool,
    },

    /// Check the package repositories for a cloud version
    Repocheck {
        /// Cloud version, e.g. 7
        version: String,
    },

    /// Decide whether a role may run on a node
    Role {
        node: String,
        barclamp: String,
        role: String,
    },

    /// Admin server upgrade
    Upgrade {
        #[command(subcommand)]
        command: commands::upgrade::UpgradeCommands,
    },

    /// Query a fleetgate daemon's REST API
    Query {
        /// Target daemon name (from config nodes map; defaults to localhost)
        #[arg(long)]
        node: Option<String>,

        #[command(subcommand)]
        command: commands::query::QueryCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let format = cli.format.as_str();

    if !matches!(cli.command, Commands::Daemon { .. }) {
        server::init_tracing("warn", false);
    }

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
            inventory,
        } => commands::daemon::run(http_addr, log_level, inventory, config),
        Commands::Status => commands::status::run(config, format),
        Commands::Check { name, save } => {
            commands::check::run(config, name.as_deref(), save, format)
        }
        Commands::Repocheck { version } => commands::repocheck::run(config, &version, format),
        Commands::Role {
            node,
            barclamp,
            role,
        } => commands::role::run(config, &node, &barclamp, &role, format),
        Commands::Upgrade { command } => commands::upgrade::run(config, format, &command),
        Commands::Query { node, command } => {
            commands::query::run(config, node.as_deref(), format, &command)
        }
    }
}
