use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use analyst_cluster::broker::{BrokerClient, HttpBroker};
use analyst_cluster::documents::{DocumentStore, MemoryDocumentStore};
use analyst_cluster::queue::{MemoryResultQueue, ResultQueue, SqsResultQueue};
use analyst_cluster::storage::{BlobStorage, LocalStorage, S3Storage};
use analyst_engine::manager::{ManagerDeps, RegionalAnalysisManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analyst_api::config::ServerConfig;
use analyst_api::router::build_app_router;
use analyst_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "analyst_api=debug,analyst_engine=debug,tower_http=debug".into());
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        offline = config.offline,
        "Loaded server configuration"
    );

    // --- Documents ---
    let documents = match &config.documents_path {
        Some(path) => MemoryDocumentStore::load(path)
            .await
            .expect("Failed to load documents"),
        None => {
            tracing::warn!("DOCUMENTS_PATH not set, no bundles are known");
            MemoryDocumentStore::new()
        }
    };
    tracing::info!(bundles = documents.bundle_count().await, "Documents loaded");
    let documents: Arc<dyn DocumentStore> = Arc::new(documents);

    // --- Cluster ---
    let broker: Arc<dyn BrokerClient> = Arc::new(HttpBroker::new(&config.broker_url));
    let (queue, bundle_storage, result_storage, local_results): (
        Arc<dyn ResultQueue>,
        Arc<dyn BlobStorage>,
        Arc<dyn BlobStorage>,
        Option<Arc<MemoryResultQueue>>,
    ) = if config.offline {
        let queue = Arc::new(MemoryResultQueue::new(config.local_results_url()));
        let storage: Arc<dyn BlobStorage> = Arc::new(LocalStorage::new(&config.local_cache));
        tracing::info!(
            broker = %config.broker_url,
            cache = %config.local_cache.display(),
            "Running against local cluster"
        );
        (
            Arc::clone(&queue) as Arc<dyn ResultQueue>,
            Arc::clone(&storage),
            storage,
            Some(queue),
        )
    } else {
        let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let s3 = aws_sdk_s3::Client::new(&aws);
        let sqs = aws_sdk_sqs::Client::new(&aws);
        let queue: Arc<dyn ResultQueue> = Arc::new(
            SqsResultQueue::from_name(sqs, &config.results_queue)
                .await
                .expect("Failed to resolve results queue"),
        );
        let bundle_storage: Arc<dyn BlobStorage> =
            Arc::new(S3Storage::new(s3.clone(), &config.bundle_bucket));
        let result_storage: Arc<dyn BlobStorage> =
            Arc::new(S3Storage::new(s3, &config.results_bucket));
        tracing::info!(
            queue = %queue.address(),
            bundle_bucket = %config.bundle_bucket,
            results_bucket = %config.results_bucket,
            "Running against AWS cluster"
        );
        (queue, bundle_storage, result_storage, None)
    };

    // --- Engine ---
    let manager = RegionalAnalysisManager::start(
        config.engine.clone(),
        ManagerDeps {
            broker,
            queue,
            bundle_storage,
            result_storage,
            documents,
        },
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        manager: Arc::clone(&manager),
        local_results,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, manager.shutdown()).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Regional analysis manager did not shut down in time"
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
