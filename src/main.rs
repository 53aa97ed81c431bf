use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_assist::config::{AppConfig, LogConfig};
use mail_assist::llm::{
    DocumentClient, ImageDescriptionClient, LlmBackend, ReplyDraftClient, SummarizationClient,
    create_provider,
};
use mail_assist::mail::{GmailTransport, MailTransport};
use mail_assist::pipeline::{Orchestrator, spawn_recurring_fetch};
use mail_assist::session::SessionStore;
use mail_assist::web::{AppState, routes};
use mail_assist::worker::WorkerPool;

/// Console plus a daily rolling file. The guard flushes the file on drop.
fn init_tracing(log: &LogConfig) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&log.dir)
        .with_context(|| format!("Failed to create log directory {}", log.dir.display()))?;
    let appender = tracing_appender::rolling::daily(&log.dir, &log.file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.log)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Mail Assist starting");
    for (name, provider) in [
        ("GEMINI_API_KEY", &config.gemini),
        ("MISTRAL_REPLY_API_KEY", &config.mistral_reply),
        ("MISTRAL_API_KEY", &config.mistral_doc),
    ] {
        if provider.api_key.is_none() {
            warn!("{name} environment variable not set");
        }
    }

    let gemini = create_provider(LlmBackend::Gemini, &config.gemini)
        .context("Failed to create Gemini provider")?;
    let summarizer = SummarizationClient::new(Arc::clone(&gemini));
    let images = Arc::new(ImageDescriptionClient::new(gemini));
    let drafter = ReplyDraftClient::new(
        create_provider(LlmBackend::Mistral, &config.mistral_reply)
            .context("Failed to create Mistral reply provider")?,
    );
    let documents = DocumentClient::new(
        create_provider(LlmBackend::Mistral, &config.mistral_doc)
            .context("Failed to create Mistral document provider")?,
    );

    let transport: Arc<dyn MailTransport> = Arc::new(GmailTransport::new(&config.mail));
    let orchestrator = Arc::new(Orchestrator::new(
        transport,
        summarizer,
        drafter,
        config.mail.max_results,
        config.pipeline.mark_read,
    ));
    let pool = Arc::new(WorkerPool::new(config.pipeline.worker_pool_size));
    let sessions = Arc::new(SessionStore::new(documents));

    let recurring = config.pipeline.auto_fetch.then(|| {
        spawn_recurring_fetch(
            Arc::clone(&orchestrator),
            Arc::clone(&pool),
            config.pipeline.auto_fetch_interval,
        )
    });

    let app = routes(AppState {
        orchestrator,
        pool: Arc::clone(&pool),
        sessions,
        images,
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        mark_read = ?config.pipeline.mark_read,
        auto_fetch = config.pipeline.auto_fetch,
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some((handle, stop)) = recurring {
        stop.store(true, Ordering::Relaxed);
        handle.abort();
    }
    pool.shutdown();
    info!("Mail Assist stopped");
    Ok(())
}
