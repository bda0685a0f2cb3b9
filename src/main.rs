use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use courier::{config, db, routes, AppState};

#[tokio::main]
async fn main() -> config::Result<()> {
    // 1. Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load configuration
    let cfg = config::load()?;
    info!("Starting courier in {:?} mode", cfg.env);

    // 3. Create Postgres connection pool and apply migrations
    let pool = db::create_pool(cfg.require_database_url()?).await?;
    info!("Connected to Postgres");
    db::run_migrations(&pool).await?;

    // 4. Build application state
    let state = AppState {
        db: pool,
        config: cfg.clone(),
    };

    // 5. Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    // 6. Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    info!("Listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Courier API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    // Simple DB check: SELECT 1
    if let Err(err) = sqlx::query("SELECT 1").execute(&state.db).await {
        error!("DB health check failed: {:?}", err);
        return Json(json!({
            "status": "error",
            "db": "down",
        }));
    }

    Json(json!({
        "status": "ok",
        "env": format!("{:?}", state.config.env),
    }))
}
