//! Perkon CLI - command line interface for the Perkon model serving control plane

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use warp::Filter;

use perkon_cli::client::PerkonClient;
use perkon_cli::config::Config;
use perkon_control::{
    control_routes, handle_rejection, AppContext, ArtifactSource, HttpArtifactSource,
    StaticArtifactSource,
};
use perkon_core::config::PlaneConfig;
use perkon_serving::metrics::MetricsServer;
use perkon_serving::store::{FileStore, MemoryStore, TtlStore};

#[derive(Parser)]
#[command(name = "perkon")]
#[command(version = "0.1.0")]
#[command(about = "Perkon - model serving control plane", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "PERKON_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PERKON_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Perkon control plane server
    Serve {
        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,

        /// Enable Prometheus metrics endpoint
        #[arg(long)]
        metrics: bool,

        /// Metrics endpoint port
        #[arg(long)]
        metrics_port: Option<u16>,

        /// API key for control API authentication (disables auth if not set)
        #[arg(long, env = "PERKON_API_KEY")]
        api_key: Option<String>,

        /// Directory for persistent state (enables recovery on restart)
        #[arg(long, env = "PERKON_STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Artifact service base URL for resolving model handles
        #[arg(long, env = "PERKON_ARTIFACT_URL")]
        artifact_url: Option<String>,
    },

    /// Generate example configuration file
    ConfigGen {
        /// Output format (yaml, toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List models registered on a remote control plane
    Models {
        /// Server URL (e.g. http://localhost:9000)
        #[arg(long, env = "PERKON_SERVER", default_value = "http://127.0.0.1:9000")]
        server: String,

        /// API key
        #[arg(long, env = "PERKON_API_KEY")]
        api_key: Option<String>,
    },

    /// Run a health check for a model on a remote control plane
    Health {
        /// Server URL (e.g. http://localhost:9000)
        #[arg(long, env = "PERKON_SERVER", default_value = "http://127.0.0.1:9000")]
        server: String,

        /// API key
        #[arg(long, env = "PERKON_API_KEY")]
        api_key: Option<String>,

        /// Model name
        model: String,
    },

    /// List active alerts on a remote control plane
    Alerts {
        /// Server URL (e.g. http://localhost:9000)
        #[arg(long, env = "PERKON_SERVER", default_value = "http://127.0.0.1:9000")]
        server: String,

        /// API key
        #[arg(long, env = "PERKON_API_KEY")]
        api_key: Option<String>,

        /// Filter to one model
        #[arg(short, long)]
        model: Option<String>,

        /// Minimum severity (info, warning, critical)
        #[arg(short, long)]
        severity: Option<String>,
    },

    /// Acknowledge an alert on a remote control plane
    Ack {
        /// Server URL (e.g. http://localhost:9000)
        #[arg(long, env = "PERKON_SERVER", default_value = "http://127.0.0.1:9000")]
        server: String,

        /// API key
        #[arg(long, env = "PERKON_API_KEY")]
        api_key: Option<String>,

        /// Alert ID
        alert_id: String,

        /// Name recorded as the acknowledger
        #[arg(long, default_value = "perkon-cli")]
        by: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file if specified
    let mut config = Config::default();
    if let Some(ref path) = cli.config {
        config.merge(Config::load(path).map_err(|e| anyhow::anyhow!("{}", e))?);
    }

    // Initialize logging; the CLI flag wins over the config file
    let level_str = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let level: Level = level_str
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", level_str))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            metrics,
            metrics_port,
            api_key,
            state_dir,
            artifact_url,
        } => {
            // Merge config file settings with CLI arguments
            let port = port.unwrap_or(config.server.port);
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let metrics_enabled = metrics || config.server.metrics_enabled;
            let metrics_port = metrics_port.unwrap_or(config.server.metrics_port);
            let api_key = api_key.or_else(|| config.server.api_key.clone());
            let state_dir = state_dir.or_else(|| config.server.state_dir.clone());
            let artifact_url = artifact_url.or_else(|| config.server.artifact_url.clone());
            let plane = config.plane.clone().unwrap_or_default();

            run_serve(
                port,
                &bind,
                metrics_enabled,
                metrics_port,
                api_key,
                state_dir,
                artifact_url,
                plane,
            )
            .await?;
        }

        Commands::ConfigGen { format, output } => {
            let content = match format.to_lowercase().as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }

        Commands::Models { server, api_key } => {
            let client = PerkonClient::new(&server, api_key);
            match client.list_models().await {
                Ok(resp) => {
                    println!("Models ({} total):", resp.total);
                    if resp.models.is_empty() {
                        println!("  (none)");
                    }
                    for m in &resp.models {
                        println!(
                            "  {} | v{} | {} | {} | {} predictions | {}",
                            m.name,
                            m.version,
                            m.model_type,
                            m.health,
                            m.prediction_count,
                            if m.loaded { "loaded" } else { "unloaded" },
                        );
                    }
                }
                Err(e) => {
                    anyhow::bail!("Failed to list models: {}", e);
                }
            }
        }

        Commands::Health {
            server,
            api_key,
            model,
        } => {
            let client = PerkonClient::new(&server, api_key);
            match client.model_health(&model).await {
                Ok(report) => {
                    println!("Model: {}", report.model);
                    println!(
                        "  Health: {} (score {:.2})",
                        report.overall_health, report.health_score
                    );
                    println!("  Checks:");
                    for check in &report.checks {
                        match &check.error {
                            Some(error) => {
                                println!("    {} [{}]: {}", check.name, check.status, error)
                            }
                            None => println!("    {} [{}]", check.name, check.status),
                        }
                    }
                    if !report.alerts.is_empty() {
                        println!("  Alerts raised: {}", report.alerts.len());
                    }
                }
                Err(e) => {
                    anyhow::bail!("Health check failed: {}", e);
                }
            }
        }

        Commands::Alerts {
            server,
            api_key,
            model,
            severity,
        } => {
            let client = PerkonClient::new(&server, api_key);
            match client
                .list_alerts(model.as_deref(), severity.as_deref())
                .await
            {
                Ok(resp) => {
                    println!("Active alerts ({} total):", resp.total);
                    if resp.alerts.is_empty() {
                        println!("  (none)");
                    }
                    for alert in &resp.alerts {
                        println!(
                            "  {} | {} | {} | {} | {}",
                            alert.id, alert.severity, alert.model, alert.kind, alert.message
                        );
                    }
                }
                Err(e) => {
                    anyhow::bail!("Failed to list alerts: {}", e);
                }
            }
        }

        Commands::Ack {
            server,
            api_key,
            alert_id,
            by,
        } => {
            let client = PerkonClient::new(&server, api_key);
            match client.acknowledge_alert(&alert_id, &by).await {
                Ok(alert) => {
                    println!("Alert {} acknowledged by {}.", alert.id, by);
                }
                Err(e) => {
                    anyhow::bail!("Acknowledge failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_serve(
    port: u16,
    bind: &str,
    enable_metrics: bool,
    metrics_port: u16,
    api_key: Option<String>,
    state_dir: Option<PathBuf>,
    artifact_url: Option<String>,
    plane: PlaneConfig,
) -> Result<()> {
    println!("Perkon Control Plane");
    println!("====================");
    println!("REST API:  http://{}:{}/api/v1/", bind, port);
    println!(
        "Auth:      {}",
        if api_key.is_some() {
            "enabled (API key required)"
        } else {
            "disabled"
        }
    );
    println!(
        "State:     {}",
        match &state_dir {
            Some(dir) => format!("{}", dir.display()),
            None => "in-memory (no persistence)".to_string(),
        }
    );
    println!(
        "Artifacts: {}",
        match &artifact_url {
            Some(url) => url.clone(),
            None => "none (endpoint registration only)".to_string(),
        }
    );
    if enable_metrics {
        println!("Metrics:   http://{}:{}/metrics", bind, metrics_port);
    }
    println!();

    let store: Arc<dyn TtlStore> = match &state_dir {
        Some(dir) => Arc::new(
            FileStore::open(dir)
                .map_err(|e| anyhow::anyhow!("Could not open state dir: {}", e))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let artifacts: Arc<dyn ArtifactSource> = match &artifact_url {
        Some(url) => Arc::new(HttpArtifactSource::new(url)),
        None => Arc::new(StaticArtifactSource::new()),
    };

    let context = AppContext::new(plane, store, artifacts);
    context.recover().await;
    context.spawn_background();

    if enable_metrics {
        let server = MetricsServer::new(
            context.metrics.clone(),
            format!("{}:{}", bind, metrics_port),
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let routes = control_routes(context.clone(), api_key).recover(handle_rejection);

    let bind_addr: std::net::IpAddr = bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", bind, e))?;

    info!("Server listening on {}:{}", bind, port);
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown((bind_addr, port), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    });
    server.await;
    context.shutdown();

    Ok(())
}
