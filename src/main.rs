//! Article digest service - main entry point

use article_digest::agents::ReqwestFetch;
use article_digest::clock::SystemClock;
use article_digest::config::AppConfig;
use article_digest::health::{HealthCheckManager, LlmProviderHealthCheck, StoreHealthCheck};
use article_digest::llm::provider::LlmProvider;
use article_digest::llm::providers::OpenAiProvider;
use article_digest::observability::{init_default_logging, init_logging, LogFormat};
use article_digest::protocol::WorkflowRequest;
use article_digest::server;
use article_digest::store::{MemoryStore, RedisStore, SharedStore};
use article_digest::workflow::{Collaborators, WorkflowCoordinator};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Health article processing service
#[derive(Parser)]
#[command(name = "article-digest")]
#[command(about = "Fetch, summarize and assess health articles")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Check a URL against the configured allow-list
    CheckUrl { url: String },
    /// Process one article and print the response
    Process { url: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_server(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::CheckUrl { url } => check_url(&config, &url),
        Commands::Process { url } => process_once(&config, &url).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            AppConfig::load_from_file(path)?
        }
        None => {
            let default_paths = ["article-digest.toml", "config/article-digest.toml"];
            match default_paths
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
            {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    AppConfig::load_from_file(&path)?
                }
                None => {
                    warn!("No configuration file found, using defaults");
                    AppConfig::default()
                }
            }
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Bootstrap: build every collaborator from configuration
async fn build_collaborators(
    config: &AppConfig,
) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let store: Arc<dyn SharedStore> = match &config.store.redis_url {
        Some(url) => {
            info!("Using Redis shared store");
            Arc::new(RedisStore::connect(url).await?)
        }
        None => {
            warn!("No redis_url configured, using in-process store (single replica only)");
            Arc::new(MemoryStore::new())
        }
    };

    let validator = Arc::new(config.validation.build_validator()?);
    let api_key = config.llm.api_key()?;
    let provider: Arc<dyn LlmProvider> =
        Arc::new(OpenAiProvider::new(config.llm.openai_config(api_key))?);
    let http = Arc::new(ReqwestFetch::new(config.fetch.settings(), validator.clone())?);

    Ok(Collaborators {
        store,
        clock: Arc::new(SystemClock),
        provider,
        http,
        validator,
    })
}

async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting article-digest v{}", env!("CARGO_PKG_VERSION"));

    let deps = build_collaborators(&config).await?;

    let mut health = HealthCheckManager::new();
    health.add_health_check(Box::new(LlmProviderHealthCheck::new(deps.provider.clone())));
    health.add_health_check(Box::new(StoreHealthCheck::new(deps.store.clone())));

    let coordinator = Arc::new(WorkflowCoordinator::from_config(&config, deps));

    server::serve(&config.server, coordinator, Arc::new(health), shutdown_signal()).await?;

    info!("Application shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn check_url(config: &AppConfig, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let validator = config.validation.build_validator()?;
    match validator.validate(url) {
        Ok(normalized) => {
            println!("{normalized}");
            Ok(())
        }
        Err(e) => Err(format!("{} ({})", e, e.code()).into()),
    }
}

async fn process_once(config: &AppConfig, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let deps = build_collaborators(config).await?;
    let coordinator = WorkflowCoordinator::from_config(config, deps);

    let outcome = coordinator
        .process(&WorkflowRequest::for_url(url), "cli")
        .await;
    match outcome.result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_envelope())?);
            Err(e.into())
        }
    }
}
