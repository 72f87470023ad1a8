//! lerno-worker - background job pipeline process.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lerno_core::defaults;
use lerno_db::Database;
use lerno_embed::{EmbeddingBackend, HttpBackendConfig, HttpEmbeddingBackend};
use lerno_jobs::{
    AiMessagesHandler, ConnectedCustomerHandler, CourseEmbeddingHandler, HttpEmailSender,
    HttpPaymentProvider, HttpThumbnailRenderer, Pipeline, PipelineConfig, ThumbnailHandler,
    WelcomeEmailHandler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    //
    // Environment variables:
    //   LOG_FORMAT - "json" or "text" (default: "text")
    //   RUST_LOG   - standard env filter (default: "lerno_jobs=debug,lerno_db=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lerno_jobs=debug,lerno_db=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Connect to database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/lerno".to_string());
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let transport = Arc::new(db.transport.clone());
    let history = Arc::new(db.history.clone());
    let catalog = Arc::new(db.catalog.clone());
    let billing = Arc::new(db.billing.clone());
    let chat = Arc::new(db.chat.clone());

    let backend: Arc<dyn EmbeddingBackend> =
        Arc::new(HttpEmbeddingBackend::new(HttpBackendConfig::from_env())?);

    let pipeline = Pipeline::builder(transport, history)
        .with_config(PipelineConfig::from_env())
        .with_handler(WelcomeEmailHandler::new(Arc::new(
            HttpEmailSender::from_env()?,
        )))
        .with_handler(ConnectedCustomerHandler::new(
            billing,
            Arc::new(HttpPaymentProvider::from_env()?),
        ))
        .with_handler(CourseEmbeddingHandler::new(backend, catalog))
        .with_handler(AiMessagesHandler::new(chat))
        .with_handler(ThumbnailHandler::new(Arc::new(
            HttpThumbnailRenderer::from_env()?,
        )))
        .build()?;

    let handle = pipeline.start();

    // Shut down on SIGINT or SIGTERM
    shutdown_signal().await;
    info!("Shutdown signal received");

    let drain_timeout = std::env::var("SHUTDOWN_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(defaults::SHUTDOWN_TIMEOUT_SECS);
    handle.shutdown(Duration::from_secs(drain_timeout)).await?;

    info!("Worker exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
