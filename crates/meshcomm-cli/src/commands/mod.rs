use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use meshcomm_config::{ConfigLoader, MeshCommConfig};
use meshcomm_core::{MeshCommError, Result};

mod start;

/// MeshComm — peer-to-peer emergency chat over a gossip mesh
#[derive(Parser)]
#[command(name = "meshcomm", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to meshcomm.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the mesh, serve the web UI and log incoming messages
    Start {
        /// libp2p TCP port (overrides node.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Display name (overrides node.nickname)
        #[arg(short, long)]
        nickname: Option<String>,
        /// Extra peer multiaddr to dial; repeatable
        #[arg(long = "peer", value_name = "MULTIADDR")]
        peers: Vec<String>,
        /// Don't start the HTTP server
        #[arg(long)]
        no_server: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for the log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let log_level = resolve_log_level(
            self.verbose,
            self.quiet,
            self.log_level.as_deref(),
            &config.logging.level,
        );
        init_logging(log_level, &config.logging.format);

        match self.command {
            Commands::Start {
                port,
                nickname,
                peers,
                no_server,
            } => {
                let config = start::apply_overrides(config, port, nickname)?;
                start::cmd_start(config, peers, no_server).await
            }
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: MeshCommConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| MeshCommError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("MeshComm v{}", env!("CARGO_PKG_VERSION"));
        println!("   Topics: EMERGENCY, GENERAL, HELP");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Build: debug");
        #[cfg(not(debug_assertions))]
        println!("   Build: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "meshcomm", &mut std::io::stdout());
        Ok(())
    }
}

/// --verbose > --quiet > --log-level > config. `RUST_LOG` beats all of them.
fn resolve_log_level<'a>(
    verbose: bool,
    quiet: bool,
    flag: Option<&'a str>,
    configured: &'a str,
) -> &'a str {
    if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        flag.unwrap_or(configured)
    }
}

fn init_logging(log_level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}
