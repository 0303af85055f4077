use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use dockerina::docker::{ContainerEngine, DockerClient, DockerConfig, RuntimeAdapter};
use dockerina::jobs::ProgressStore;
use dockerina::progress::{ConsoleSink, ProgressReporter, ToolOutput};
use dockerina::tracing::{init_tracing, shutdown_tracing, OTLP_ENDPOINT_ENV};

/// How often expired jobs are swept
const REAPER_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "dockerina", version, about = "Docker pulls and execs with live progress")]
struct Cli {
    /// Milliseconds between progress lines (minimum 1000)
    #[arg(long, global = true, default_value_t = 5000)]
    interval_ms: u64,

    /// Exec timeout in milliseconds; overrides DOCKER_EXEC_TIMEOUT_MS
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// OTLP collector endpoint; overrides OTEL_EXPORTER_OTLP_ENDPOINT
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull an image, e.g. `alpine:3.19`
    Pull { image: String },
    /// Run a command in a running container
    Exec {
        container: String,
        /// Report progress through a background job
        #[arg(long)]
        tracked: bool,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let otlp_endpoint = cli
        .otlp_endpoint
        .clone()
        .or_else(|| std::env::var(OTLP_ENDPOINT_ENV).ok())
        .filter(|endpoint| !endpoint.is_empty());
    init_tracing("dockerina", otlp_endpoint.as_deref())?;

    let result = run(&cli).await;
    if let Err(e) = &result {
        error!(error = %e, "command failed");
    }

    if cli.metrics {
        print!("{}", dockerina::metrics::gather_text());
    }
    shutdown_tracing();
    result
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = DockerConfig::from_env()?;
    if let Some(ms) = cli.timeout_ms {
        config.exec_timeout = Duration::from_millis(ms);
    }

    let client = DockerClient::from_config(&config);
    client.ping().await?;
    info!(host = %client.host(), "connected to docker engine");

    let store = Arc::new(ProgressStore::default());
    let reaper = ProgressStore::spawn_reaper(store.clone(), REAPER_PERIOD);

    let runtime = RuntimeAdapter::new(Arc::new(client), store.clone(), config.exec_timeout);
    let reporter = ProgressReporter::new(store);
    let interval = Duration::from_millis(cli.interval_ms);

    let value = match &cli.command {
        Command::Pull { image } => {
            let output = ToolOutput::from(runtime.pull_image(image, None));
            output
                .settle_every(&reporter, "pull_image", interval, &ConsoleSink)
                .await
        }
        Command::Exec {
            container,
            tracked: true,
            cmd,
        } => {
            let output = ToolOutput::from(runtime.exec_container_tracked(container, cmd.clone()));
            output
                .settle_every(&reporter, "exec_container", interval, &ConsoleSink)
                .await
        }
        Command::Exec {
            container,
            tracked: false,
            cmd,
        } => {
            let output = runtime.exec_container(container, cmd).await?;
            serde_json::to_value(output)?
        }
    };

    reaper.abort();
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
