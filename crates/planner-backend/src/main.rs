use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use planner_backend::auth::AuthConfig;
use planner_backend::config::AppConfig;
use planner_backend::pollers::{start_todo_polling_task, TodoPollerConfig};
use planner_backend::repository::PgStore;
use planner_backend::{build_router, db, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("planner_backend=debug,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let auth_config = AuthConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid auth configuration")?;

    // Establish database connection pool
    let pool = db::establish_connection_pool(&config.database_url)?;
    let store = Arc::new(PgStore::new(pool));

    let port = config.port;
    let poller_config = TodoPollerConfig::from_config(&config);
    let state = AppState::new(config, auth_config, store);

    match poller_config {
        Some(poller_config) => {
            let store = state.store.clone();
            let todo_sync = state.todo_sync.clone();
            tokio::spawn(async move {
                start_todo_polling_task(store, todo_sync, poller_config).await;
            });
        }
        None => tracing::info!("Background To Do sync disabled"),
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
