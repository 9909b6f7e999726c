use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use brandme::config::{ApiArgs, Config};
use brandme::constants;
use brandme::gateway::{CompletionGateway, OpenAiGateway};
use brandme::session::Session;
use brandme::web_server::{self, ServerOptions};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web server.
    Start {
        #[arg(long, default_value = "127.0.0.1", help = "Address to listen on.")]
        host: IpAddr,
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding index.html.")]
        templates_dir: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
        #[arg(long, default_value_t = constants::DEFAULT_SESSION_TTL_SECS, help = "Drop sessions idle for this many seconds.")]
        session_ttl_secs: u64,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Get a nickname and chat in the terminal.
    Chat {
        #[command(flatten)]
        api: ApiArgs,
    },
}

fn gateway(api: ApiArgs) -> Result<Arc<dyn CompletionGateway>> {
    // A missing key stops here, before anything is served.
    let config = Config::try_from(api)?;
    info!(model = %config.model, base_url = %config.base_url, "Completion API configured");
    let gateway = OpenAiGateway::new(&config).context("Failed to build HTTP client")?;
    Ok(Arc::new(gateway))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,brandme=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            host,
            port,
            templates_dir,
            static_dir,
            session_ttl_secs,
            api,
        } => {
            let gateway = gateway(api)?;
            info!("Starting web server on port {}...", port);
            let options = ServerOptions {
                host,
                port,
                templates_dir,
                static_dir,
                session_ttl: Duration::from_secs(session_ttl_secs),
            };
            web_server::start_web_server(options, gateway).await?;
        }
        Commands::Chat { api } => {
            let gateway = gateway(api)?;
            info!("Starting interactive chat session...");
            let mut session = Session::new(gateway);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            brandme::chat::run_chat(&mut session, stdin, &mut stdout)
                .await
                .context("Chat session failed")?;
            info!("Chat session finished.");
        }
    }

    Ok(())
}
