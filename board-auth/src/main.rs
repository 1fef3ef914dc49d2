use board_auth::{
    build_router,
    config::{BoardAuthConfig, StoreBackend},
    services::{
        EmailService, MemoryPasswordResetStore, MemorySessionStore, MemoryUserStore, MongoDb,
        PasswordResetStore, SessionStore, UserStore,
    },
    AppState,
};
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

type Stores = (
    Arc<dyn UserStore>,
    Arc<dyn SessionStore>,
    Arc<dyn PasswordResetStore>,
);

async fn open_stores(config: &BoardAuthConfig) -> Result<Stores, service_core::error::AppError> {
    match config.store.backend {
        StoreBackend::MongoDb => {
            let db = Arc::new(MongoDb::connect(&config.store).await?);
            db.initialize_indexes().await?;
            tracing::info!("Database initialized successfully");
            let users: Arc<dyn UserStore> = db.clone();
            let sessions: Arc<dyn SessionStore> = db.clone();
            let resets: Arc<dyn PasswordResetStore> = db;
            Ok((users, sessions, resets))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; all state is lost on restart");
            let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
            let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
            let resets: Arc<dyn PasswordResetStore> = Arc::new(MemoryPasswordResetStore::new());
            Ok((users, sessions, resets))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = BoardAuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(service_core::error::AppError::ConfigError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        backend = ?config.store.backend,
        "Starting board auth service"
    );

    let (users, sessions, resets) = open_stores(&config).await?;

    let email = Arc::new(EmailService::new(&config.mail)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state = AppState::new(config, users, sessions, resets, email)?;
    let app = build_router(state);

    let _guard = service_span.enter();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Let in-flight requests finish
    tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
}
