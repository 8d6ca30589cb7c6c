//! ContextRelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`      Start the HTTP server
//! - `generate`   Write template request files
//! - `api`        Send requests to a running server
//! - `events`     Follow the relay event stream
//! - `config`     Inspect or create the configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::generate::Template;

#[derive(Parser)]
#[command(
    name = "contextrelay",
    about = "ContextRelay: context sharing for multi-agent systems",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ~/.contextrelay/config.toml)
    #[arg(short, long, global = true, env = "CONTEXT_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a template request body to a file
    Generate {
        #[arg(value_enum)]
        template: Template,

        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Context id to fill into the template
        #[arg(long)]
        context_id: Option<String>,
    },

    /// Call a running server
    Api {
        /// Base URL of the server
        #[arg(
            long,
            global = true,
            env = "CONTEXT_RELAY_BASE_URL",
            default_value = "http://localhost:8000"
        )]
        base_url: String,

        #[command(subcommand)]
        action: ApiAction,
    },

    /// Relay event stream
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ApiAction {
    /// POST /context/initialize
    Init {
        #[arg(long)]
        from_file: PathBuf,
    },
    /// POST /context/relay
    Relay {
        #[arg(long)]
        from_file: PathBuf,
    },
    /// POST /context/merge
    Merge {
        #[arg(long)]
        from_file: PathBuf,
    },
    /// POST /context/prune
    Prune {
        #[arg(long)]
        from_file: PathBuf,
    },
    /// POST /context/version
    Version {
        #[arg(long)]
        from_file: PathBuf,
    },
    /// GET /context/{id}
    Get { context_id: String },
    /// GET /context/{id}/versions
    Versions { context_id: String },
    /// GET /context
    List,
    /// GET /health
    Health,
}

#[derive(Subcommand)]
enum EventsAction {
    /// Print events from the SSE stream as they arrive
    Listen {
        #[arg(
            long,
            env = "CONTEXT_RELAY_BASE_URL",
            default_value = "http://localhost:8000"
        )]
        base_url: String,

        /// Comma-separated event types to subscribe to
        #[arg(long)]
        types: Option<String>,

        #[arg(long)]
        client_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Generate {
            template,
            output,
            context_id,
        } => commands::generate::run(template, output.as_deref(), context_id.as_deref())?,
        Commands::Api { base_url, action } => {
            let client = commands::api::ApiClient::new(&base_url)?;
            let body = match action {
                ApiAction::Init { from_file } => {
                    client.post_file("/context/initialize", &from_file).await?
                }
                ApiAction::Relay { from_file } => {
                    client.post_file("/context/relay", &from_file).await?
                }
                ApiAction::Merge { from_file } => {
                    client.post_file("/context/merge", &from_file).await?
                }
                ApiAction::Prune { from_file } => {
                    client.post_file("/context/prune", &from_file).await?
                }
                ApiAction::Version { from_file } => {
                    client.post_file("/context/version", &from_file).await?
                }
                ApiAction::Get { context_id } => {
                    client.get(&format!("/context/{context_id}")).await?
                }
                ApiAction::Versions { context_id } => {
                    client.get(&format!("/context/{context_id}/versions")).await?
                }
                ApiAction::List => client.get("/context").await?,
                ApiAction::Health => client.get("/health").await?,
            };
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Events { action } => match action {
            EventsAction::Listen {
                base_url,
                types,
                client_id,
            } => commands::events::listen(&base_url, types.as_deref(), client_id.as_deref()).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
