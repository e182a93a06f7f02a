#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veritas_config::{load_config, validate_config};
use veritas_daemon::{Core, build_app};

#[derive(Parser, Debug)]
#[command(name = "veritas-daemon", version, about = "AI-content provenance service")]
struct Args {
    /// Bind address for the HTTP API.
    #[arg(long, default_value = "127.0.0.1:8088")]
    bind: String,

    /// Path to a TOML configuration file. Defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `database_url` from the config file or defaults.
    #[arg(long)]
    database_url: Option<String>,

    /// Seconds to wait for in-flight requests to finish after SIGTERM.
    #[arg(long, default_value_t = 30)]
    shutdown_timeout_seconds: u64,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("veritas=debug,tower_http=debug")
    } else {
        EnvFilter::new("veritas=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config.as_deref())
        .with_context(|| "failed to load configuration")?;
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    for warning in validate_config(&config).with_context(|| "invalid configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let (core, scheduler_handle, webhook_handle) = Core::new(config)
        .await
        .with_context(|| "failed to initialize core components")?;

    let app = build_app(Arc::clone(&core));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "veritas-daemon listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_signal().await;
    info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(args.shutdown_timeout_seconds);
    match tokio::time::timeout(shutdown_timeout, server_task).await {
        Ok(Ok(Ok(()))) => info!("veritas-daemon shut down cleanly"),
        Ok(Ok(Err(err))) => return Err(err).context("serve"),
        Ok(Err(join_err)) => return Err(join_err).context("server task panicked"),
        Err(_) => tracing::warn!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "shutdown timeout exceeded, forcing exit with requests still in flight"
        ),
    }

    // Webhook delivery completes its current item under its own per-attempt
    // timeout regardless of this call; these only stop scheduling new cycles.
    scheduler_handle.shutdown();
    webhook_handle.shutdown();

    Ok(())
}

/// Resolves once a termination signal (Ctrl-C or, on Unix, SIGTERM) arrives.
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
