use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use future_viewings::api::viewing_routes;
use future_viewings::artifacts::{LocalArtifactSink, spawn_cleanup_task};
use future_viewings::config::ServiceConfig;
use future_viewings::generation::{ImageGenerator, OpenAiImageGenerator, UnconfiguredGenerator};
use future_viewings::jobs::{JobQueue, Worker, WorkerDeps};
use future_viewings::store::{Database, LibSqlBackend};
use future_viewings::viewings::ViewingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🔭 Future Viewings v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/viewings", config.port);
    eprintln!("   Images: {}", config.images_dir().display());
    eprintln!("   Queue capacity: {}\n", config.queue_capacity);

    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("Failed to open database")?,
    );

    let images_dir = config.images_dir();
    tokio::fs::create_dir_all(&images_dir)
        .await
        .with_context(|| format!("Failed to create {}", images_dir.display()))?;

    let generator: Arc<dyn ImageGenerator> = match OpenAiImageGenerator::new(config.generator.clone()) {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            tracing::warn!(error = %e, "Image generation disabled, every viewing will fail");
            Arc::new(UnconfiguredGenerator::new(e.to_string()))
        }
    };
    let sink = Arc::new(LocalArtifactSink::new(&config.static_dir, &config.images_subdir));

    let (queue, receiver) = JobQueue::bounded(config.queue_capacity);
    let shutdown = CancellationToken::new();

    let worker = Worker::new(WorkerDeps {
        store: store.clone(),
        generator,
        sink,
    })
    .spawn(receiver, shutdown.child_token());

    let cleanup = config.cleanup_interval.map(|interval| {
        spawn_cleanup_task(
            images_dir.clone(),
            config.cleanup_days,
            interval,
            shutdown.child_token(),
        )
    });

    let service = ViewingService::new(store, queue);
    let app = viewing_routes(service, &config.static_dir, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Shutting down");
    shutdown.cancel();
    worker.shutdown().await;
    if let Some(handle) = cleanup {
        let _ = handle.await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// stderr always; a daily rolling file too when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "future-viewings.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
