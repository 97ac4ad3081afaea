//! Kore Remote CLI
//!
//! Single binary for talking to a media-center host:
//! - One-shot JSON-RPC calls and state readout
//! - A live notification stream
//! - Keyboard remote, over JSON-RPC or the event server

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kore_remote::commands;
use kore_remote::output::print_error;

#[derive(Parser)]
#[command(name = "kore")]
#[command(author, version, about = "Remote control for Kodi-style media centers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "KORE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to talk to (defaults to the configured default host)
    #[arg(short = 'H', long, global = true, env = "KORE_HOST")]
    host: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a JSON-RPC method and print the result
    Call {
        /// Method name, e.g. Player.GetActivePlayers
        method: String,
        /// Params as a JSON object or array
        params: Option<String>,
    },

    /// Show what the host is playing
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Stream host notifications until interrupted
    Watch {
        /// Roles to watch (player, application, playlist, input, system)
        #[arg(short, long = "role")]
        roles: Vec<String>,
        /// Exit after this many notifications
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Print one JSON object per notification
        #[arg(long)]
        json: bool,
    },

    /// Interactive keyboard remote
    Remote {
        /// Send navigation keys as event-server button presses
        #[arg(short, long)]
        event_server: bool,
    },

    /// Send a single remote key (up, select, playpause, ...)
    Key {
        /// Key name
        name: String,
    },

    /// Press a button through the event server
    Button {
        /// Button name in the keymap, e.g. "up" or "return"
        name: String,
        /// Keymap the button belongs to
        #[arg(short, long)]
        map: Option<String>,
    },

    /// Type text into the host's input dialog
    Text {
        /// Text to send
        text: String,
        /// Leave the dialog open after sending
        #[arg(long)]
        keep_open: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Create a configuration file with an example host
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// List configured hosts
    Hosts,
    /// Edit config in editor
    Edit,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_ref();
    let host = cli.host.as_deref();

    match cli.command {
        Commands::Call { method, params } => {
            let config = commands::load_client_config(config_path)?;
            commands::call_command(config, host, &method, params.as_deref()).await?;
        }

        Commands::Status { json } => {
            let config = commands::load_client_config(config_path)?;
            commands::status_command(config, host, json).await?;
        }

        Commands::Watch { roles, count, json } => {
            let roles = commands::parse_roles(&roles)?;
            let config = commands::load_client_config(config_path)?;
            commands::watch_command(config, host, roles, count, json).await?;
        }

        Commands::Remote { event_server } => {
            let config = commands::load_client_config(config_path)?;
            commands::remote_command(config, host, event_server).await?;
        }

        Commands::Key { name } => {
            let config = commands::load_client_config(config_path)?;
            commands::key_command(config, host, &name).await?;
        }

        Commands::Button { name, map } => {
            let config = commands::load_client_config(config_path)?;
            commands::button_command(config, host, &name, map.as_deref()).await?;
        }

        Commands::Text { text, keep_open } => {
            let config = commands::load_client_config(config_path)?;
            commands::text_command(config, host, &text, keep_open).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Get { key } => commands::config_get(config_path, &key)?,
            ConfigAction::Set { key, value } => commands::config_set(config_path, &key, &value)?,
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            ConfigAction::Hosts => commands::config_hosts(config_path)?,
            ConfigAction::Edit => commands::config_edit(config_path)?,
            ConfigAction::Path => {
                let path = config_path
                    .cloned()
                    .unwrap_or_else(kr_core::config::default_config_path);
                println!("{}", path.display());
            }
        },
    }

    Ok(())
}
