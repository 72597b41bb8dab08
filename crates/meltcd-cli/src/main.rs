mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{apps::AppsSubcommand, config::ConfigSubcommand, manifest::ManifestSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "meltcd",
    about = "GitOps continuous deployment for Docker Swarm: keep services converged to manifests in git",
    version,
    propagate_version = true
)]
struct Cli {
    /// State directory (default: ~/.meltcd)
    #[arg(long, global = true, env = "MELTCD_HOME")]
    home: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore all applications and reconcile them until interrupted
    Serve,

    /// Work with application manifests
    Manifest {
        #[command(subcommand)]
        subcommand: ManifestSubcommand,
    },

    /// Edit the persisted application records
    Apps {
        #[command(subcommand)]
        subcommand: AppsSubcommand,
    },

    /// Inspect the controller configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = meltcd_core::paths::resolve_home(cli.home.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|home| match cli.command {
            Commands::Serve => cmd::serve::run(&home),
            Commands::Manifest { subcommand } => cmd::manifest::run(subcommand, cli.json),
            Commands::Apps { subcommand } => cmd::apps::run(&home, subcommand, cli.json),
            Commands::Config { subcommand } => cmd::config::run(&home, subcommand, cli.json),
        });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
