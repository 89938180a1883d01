use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sb_domain::config::{Config, LogFormat};
use sb_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "switchboard", about = "Multi-tenant AI agent runtime")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the configuration and exit non-zero on errors.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing(&config);
            serve(Arc::new(config)).await
        }
        Some(Command::Config { command }) => match command {
            ConfigCommand::Validate => {
                let issues = config.validate();
                for issue in &issues {
                    eprintln!("{issue}");
                }
                let errors = issues
                    .iter()
                    .filter(|i| {
                        i.severity == sb_domain::config::ConfigSeverity::Error
                    })
                    .count();
                if errors > 0 {
                    std::process::exit(1);
                }
                println!("configuration ok ({} warning(s))", issues.len());
                Ok(())
            }
            ConfigCommand::Show => {
                println!(
                    "{}",
                    toml::to_string_pretty(&config).context("serializing config")?
                );
                Ok(())
            }
        },
        Some(Command::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sb_gateway=debug"));
    match config.observability.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    let background = bootstrap::spawn_background(state.clone());

    let router = api::build_router(state);
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "ingress API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("serving ingress API")?;

    background.abort();
    Ok(())
}
