use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use dotenvy::Error as DotenvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mongoslow::app::AppContext;
use mongoslow::metrics::AppMetrics;
use mongoslow::source::MongoSource;
use mongoslow::state::SharedState;
use mongoslow::{config, http, poller};

/// How long to wait for the poll loop to notice cancellation on shutdown.
const POLLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about = "MongoDB slow operation exporter")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env MONGOSLOW_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, env = "DEBUG")]
    debug: bool,

    /// Environment name; loads `mongoslow-<env>.env` alongside `.env` when present.
    #[arg(short, long, env = "ENVIRONMENT", default_value = "dev")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_file(".env");
    let cli = Cli::parse();
    load_env_file(&format!("mongoslow-{}.env", cli.env));
    init_tracing(cli.debug);

    let config = config::load_config(cli.config.as_deref())?;
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let metrics = AppMetrics::new()?;
    let state = SharedState::new();
    let source = MongoSource::connect(&config.mongo).await?;

    let ctx = AppContext::new(config, metrics, state);
    let cancel = CancellationToken::new();

    // A failed poll loop takes the HTTP server down with it.
    let poller_handle = {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = poller::run(ctx, source, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    let router = http::create_router(ctx.clone());

    info!("mongoslow listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    cancel.cancel();
    match tokio::time::timeout(POLLER_DRAIN_TIMEOUT, poller_handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(anyhow!(join_err).context("poller task panicked")),
        Err(_) => {
            warn!("poller did not stop in time; exiting anyway");
            Ok(())
        }
    }
}

fn load_env_file(name: &str) {
    if let Err(err) = dotenvy::from_filename(name) {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load {name}: {other}"),
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "mongoslow=debug,tower_http=debug"
    } else {
        "mongoslow=info,tower_http=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = ?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown signal received"),
        _ = terminate => info!("shutdown signal received"),
        _ = cancel.cancelled() => warn!("poller stopped; shutting down"),
    }
}
