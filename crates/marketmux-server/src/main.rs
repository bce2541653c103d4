mod error;
mod protocol;
mod service;
mod tools;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use marketmux_core::{
    build_provider, redact_secrets, AppConfig, DataProvider, ReqwestTransport, Router,
    UpstreamTransport,
};

use crate::error::ServerError;
use crate::service::Service;

/// Resilient multi-provider market data over a JSON-RPC line protocol.
///
/// Reads one request per line on stdin and writes one response per line on
/// stdout; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "marketmux", version, about)]
struct Cli {
    /// Path to the JSON configuration file. Built-in defaults apply when
    /// omitted; an invalid file is fatal.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", redact_secrets(&error.to_string()));
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(cli.config.as_deref())?);

    let transport: Arc<dyn UpstreamTransport> = Arc::new(ReqwestTransport::new());
    let providers: Vec<Arc<dyn DataProvider>> = config
        .providers
        .iter()
        .filter(|provider| provider.enabled)
        .filter_map(|provider| build_provider(provider, Arc::clone(&transport)))
        .collect();
    if providers.is_empty() {
        return Err(ServerError::NoUsableProviders);
    }
    info!(providers = providers.len(), "providers registered");

    let router = Arc::new(Router::new(Arc::clone(&config), providers));

    let shutdown = CancellationToken::new();
    let prober = config
        .performance
        .health_probe_interval_seconds
        .map(|seconds| {
            router.health().spawn_prober(
                router.registered_providers(),
                Duration::from_secs(seconds),
                shutdown.child_token(),
            )
        });

    let service = Service::new(router);
    let outcome = service
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    shutdown.cancel();
    if let Some(handle) = prober {
        let _ = handle.await;
    }

    outcome.map_err(ServerError::from)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
