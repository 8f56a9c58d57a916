//! `linehaul-server` — the thin CLI/bootstrap binary around the `linehaul`
//! library. CLI parsing, logging/config bootstrap, and credential loading
//! are out of scope for the core library, but a runnable daemon still
//! needs this glue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use linehaul::options::{CliArgs, Options};
use linehaul::sink::{NoopTokenProvider, ReqwestSink, StaticTokenProvider, TokenProvider};

#[derive(Parser)]
#[command(name = "linehaul-server", version, about = "Syslog download-telemetry ingestion daemon")]
struct Cli {
    #[command(flatten)]
    serve: CliArgs,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Base URL of the analytics sink's REST endpoint.
    #[arg(long, env = "LINEHAUL_SINK_ENDPOINT", global = true)]
    sink_endpoint: Option<String>,

    /// Analytics table name rows are inserted into / schema is migrated on.
    #[arg(long, env = "LINEHAUL_TABLE", default_value = "downloads", global = true)]
    table: String,

    /// Bearer token the sink authenticates with. Real credential minting
    /// (OAuth2/JWT) is handled by a separate token service — this is a
    /// static stand-in for local runs and tests.
    #[arg(long, env = "LINEHAUL_SINK_TOKEN", global = true)]
    sink_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff `schema` against the sink's current columns and apply it if compatible.
    Migrate {
        /// Path to a JSON file containing the desired column list.
        #[arg(long)]
        schema: PathBuf,
    },
}

fn build_sink(cli: &Cli) -> anyhow::Result<Arc<dyn linehaul::AnalyticsSink>> {
    let endpoint = cli
        .sink_endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--sink-endpoint (or LINEHAUL_SINK_ENDPOINT) is required"))?;
    let token_provider: Arc<dyn TokenProvider> = match &cli.sink_token {
        Some(t) => Arc::new(StaticTokenProvider::new(t.clone())),
        None => Arc::new(NoopTokenProvider),
    };
    let options = Options::from_cli(&cli.serve);
    let sink = ReqwestSink::new(endpoint, token_provider, options.api_timeout, options.api_max_connections)?;
    Ok(Arc::new(sink))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("linehaul=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Migrate { schema }) => {
            let sink = build_sink(&cli)?;
            let contents = std::fs::read_to_string(schema)?;
            let desired: Vec<linehaul::models::SchemaField> = serde_json::from_str(&contents)?;
            linehaul::migrate::migrate(sink.as_ref(), &cli.table, &desired).await?;
        }
        None => {
            let options = Options::from_cli(&cli.serve);
            let sink = build_sink(&cli)?;

            let (started_tx, started_rx) = tokio::sync::oneshot::channel();
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let server_handle =
                tokio::spawn(async move { linehaul::server(sink, cli.table, options, Some(started_tx), shutdown_rx).await });

            if let Ok(addr) = started_rx.await {
                tracing::info!(%addr, "listening");
            }

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received, draining connections and in-flight batches");
            let _ = shutdown_tx.send(true);

            server_handle.await??;
        }
    }

    Ok(())
}
