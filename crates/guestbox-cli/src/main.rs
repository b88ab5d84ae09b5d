use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "guestbox",
    version,
    about = "Run translated Windows programs inside a sandbox tree"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
    /// Show the environment and command a launch would use
    Env {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        exe: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Start the environment, launch the guest and wait for it to exit
    Run {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        exe: Option<String>,
        #[arg(long)]
        no_hotplug: bool,
    },
    /// Undo mounts and ownership left by an interrupted privileged run
    Recover,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path, force } => commands::config::init(path.or(cli.config), force),
        Commands::Config { print } => {
            if print {
                commands::config::print_effective(cli.config)
            } else {
                Ok(())
            }
        }
        Commands::Env { root, exe, json } => commands::env::execute(
            commands::LaunchOverrides {
                config_path: cli.config,
                root,
                executable: exe,
            },
            json,
        ),
        Commands::Run {
            root,
            exe,
            no_hotplug,
        } => commands::run::execute(
            commands::LaunchOverrides {
                config_path: cli.config,
                root,
                executable: exe,
            },
            !no_hotplug,
        ),
        Commands::Recover => commands::recover::execute(cli.config),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
