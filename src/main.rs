use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use polychat::core::config::Config;
use polychat::gateway;
use polychat::store::Store;

#[derive(Parser)]
#[command(name = "polychat")]
#[command(about = "Multi-provider chat gateway and conversation store")]
#[command(
    long_about = "Polychat serves a streaming chat gateway that fronts OpenAI, Claude, \
Gemini, Grok, DeepSeek, and Perplexity behind a single SSE endpoint, and keeps \
conversations in a JSON file store.\n\n\
Configuration is read from the platform config directory (config.toml); the \
--bind and --data-dir flags override it for one run. Set RUST_LOG to control \
log verbosity."
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Socket address to listen on (overrides the config file)
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Directory holding the store's collection files (overrides the config file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat gateway (default)
    Serve,
    /// Print the store's collections as one JSON document
    Export,
    /// Replace store collections from a JSON document produced by export
    Import {
        /// Path to the exported document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(bind) = args.bind {
        config.bind = Some(bind);
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await,
        Commands::Export => {
            let store = Store::open(config.data_dir());
            println!("{}", store.export_data());
            Ok(())
        }
        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)?;
            let store = Store::open(config.data_dir());
            store.import_data(&json)?;
            info!(file = %file.display(), "import complete");
            Ok(())
        }
    }
}

async fn serve(config: &Config) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(config.bind()).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, gateway::router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not install the shutdown handler");
    }
}
