use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use konex_server::{
    api::{create_router, AppState},
    config::Config,
    db,
    error::AppError,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,konex_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting konex server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = db::connect(&config).await?;
    tracing::info!(database = %config.database_url, "Database connected");

    db::migrate(&pool).await?;
    tracing::info!("Database migrations completed");

    let addr = config.server_address();
    let state = AppState::new(pool, config).await;
    tracing::info!(rooms = state.rooms.all_rooms().len(), "Room directory loaded");

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    tracing::info!("Listening on ws://{}/ws/v1", addr);
    tracing::info!("Health check: http://{}/api/health", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
