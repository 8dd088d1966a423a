use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use packsmith::config::Config;
use packsmith::platform::renderer::HttpRenderer;
use packsmith::platform::telegram::TelegramClient;
use packsmith::services::backup::BackupService;
use packsmith::services::broadcast::BroadcastService;
use packsmith::services::flows::FlowController;
use packsmith::services::limits::{Authorizer, LimitPolicy};
use packsmith::services::packs::PackStore;
use packsmith::services::payments::PaymentsService;
use packsmith::services::render::RenderService;
use packsmith::services::sessions::SessionManager;
use packsmith::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packsmith=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);

    // Initialize database pool
    let db = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url())
        .await?;
    tracing::info!("Connected to SQLite at {}", config.database.path);

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Platform clients
    let telegram = Arc::new(TelegramClient::new(&config.telegram));
    let renderer = Arc::new(HttpRenderer::new(&config.render));

    // Services
    let policy = LimitPolicy::new(
        config.limits.clone(),
        Authorizer::new(config.telegram.owner_id),
    );
    let store = Arc::new(PackStore::new(
        db.clone(),
        telegram.clone(),
        policy,
        config.limits.free_pack_allowance,
    ));
    let sessions = Arc::new(SessionManager::new(config.limits.session_ttl));
    let render = Arc::new(RenderService::new(
        renderer,
        telegram.clone(),
        config.render.canvas_size,
    ));
    let payments = PaymentsService::new(config.pricing.clone());
    let backup = Arc::new(BackupService::new(db.clone(), &config.backup.dir));
    let broadcast = Arc::new(BroadcastService::new(store.clone(), telegram.clone()));

    let flows = Arc::new(FlowController::new(
        store,
        sessions,
        render,
        payments,
        backup,
        broadcast,
        telegram.clone(),
        telegram,
        config.telegram.bot_username.clone(),
    ));

    // Create app state
    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        flows,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api::router::create_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
