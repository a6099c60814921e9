//! Planner backend: tasks, categories and linked Google Calendar /
//! Microsoft To Do accounts behind one authenticated JSON API.

use std::sync::Arc;

use axum::{
    http::{header, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pollers;
pub mod providers;
pub mod realtime;
pub mod repository;
pub mod schema;
pub mod services;
pub mod sync;
pub mod tokens;

use auth::AuthConfig;
use config::AppConfig;
use providers::Providers;
use realtime::ChangeFeed;
use repository::Store;
use services::{CategoryService, ProfileService, TaskService};
use sync::{CalendarReader, MicrosoftTodoSync};
use tokens::TokenStore;

/// Shared handler state. Cheap to clone; everything inside is behind an
/// `Arc` or is itself a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth_config: Arc<AuthConfig>,
    pub store: Arc<dyn Store>,
    pub changes: ChangeFeed,
    pub tokens: TokenStore,
    pub calendar: CalendarReader,
    pub todo_sync: MicrosoftTodoSync,
    pub tasks: TaskService,
    pub categories: CategoryService,
    pub profiles: ProfileService,
}

impl AppState {
    pub fn new(config: AppConfig, auth_config: AuthConfig, store: Arc<dyn Store>) -> Self {
        let changes = ChangeFeed::default();
        let tokens = TokenStore::new(
            store.clone(),
            Providers::from_config(&config),
            changes.clone(),
            config.integration_redirect_uri(),
        );
        let todo_sync = MicrosoftTodoSync::new(store.clone(), tokens.clone(), changes.clone());

        Self {
            calendar: CalendarReader::new(tokens.clone()),
            tasks: TaskService::new(store.clone(), changes.clone(), todo_sync.clone()),
            categories: CategoryService::new(store.clone(), changes.clone()),
            profiles: ProfileService::new(store.clone(), changes.clone()),
            config: Arc::new(config),
            auth_config: Arc::new(auth_config),
            store,
            changes,
            tokens,
            todo_sync,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Tasks
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks", post(handlers::create_task))
        .route("/api/tasks/:id", put(handlers::update_task))
        .route("/api/tasks/:id", delete(handlers::delete_task))
        .route("/api/tasks/:id/drop", post(handlers::drop_task))
        // Categories
        .route("/api/categories", get(handlers::list_categories))
        .route("/api/categories", post(handlers::create_category))
        .route("/api/categories/:id", put(handlers::update_category))
        .route("/api/categories/:id", delete(handlers::delete_category))
        // Profile
        .route("/api/profile", get(handlers::get_profile))
        .route("/api/profile", put(handlers::update_profile))
        // Integrations
        .route("/api/integrations", get(handlers::list_integrations))
        .route(
            "/api/integrations/callback",
            get(handlers::integration_callback),
        )
        .route(
            "/api/integrations/callback",
            post(handlers::integration_fragment_callback),
        )
        .route(
            "/api/integrations/:provider",
            delete(handlers::disconnect_integration),
        )
        .route(
            "/api/integrations/:provider/connect",
            get(handlers::connect_integration),
        )
        .route(
            "/api/integrations/:provider/primary",
            post(handlers::set_primary_integration),
        )
        .route("/api/refresh-token", post(handlers::refresh_token))
        // Calendar, sync, realtime
        .route("/api/calendar/events", get(handlers::list_calendar_events))
        .route(
            "/api/sync/microsoft-todo",
            post(handlers::sync_microsoft_todo),
        )
        .route("/api/changes", get(handlers::change_stream))
        // Views
        .route("/api/board", get(handlers::get_board))
        .route("/api/analytics", get(handlers::get_analytics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let cors = build_cors_layer(state.config.cors_allowed_origins.as_deref());

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/login", get(auth::auth_login))
        .route("/api/auth/callback", get(auth::auth_callback))
        .route("/api/auth/me", get(auth::auth_me))
        .route("/api/auth/logout", post(auth::auth_logout))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Build CORS layer from `CORS_ALLOWED_ORIGINS`.
///
/// If set, only those origins are allowed (with credentials, for the
/// session cookie). If not set, defaults to permissive CORS (for
/// development only).
fn build_cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use planner_types::{Task, TaskStatus};
    use test_support::{test_auth_config, test_state};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn bearer(user_id: Uuid) -> String {
        let token = auth::create_token(&test_auth_config(), user_id, "ada@example.com", None)
            .expect("token");
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state("http://localhost:9");
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_session() {
        let (state, _) = test_state("http://localhost:9");
        let response = build_router(state)
            .oneshot(Request::get("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_then_list_is_user_scoped() {
        let (state, _) = test_state("http://localhost:9");
        let app = build_router(state);
        let me = Uuid::new_v4();

        let create = Request::post("/api/tasks")
            .header(header::AUTHORIZATION, bearer(me))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"title": "Plan the week", "priority": "high"}"#))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let list = |user| {
            Request::get("/api/tasks")
                .header(header::AUTHORIZATION, bearer(user))
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(list(me)).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let tasks: Vec<Task> = serde_json::from_slice(&body).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Todo);
        assert_eq!(tasks[0].duration_minutes, 30);

        let response = app.oneshot(list(Uuid::new_v4())).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let tasks: Vec<Task> = serde_json::from_slice(&body).unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_token_validates_input() {
        let (state, _) = test_state("http://localhost:9");
        let app = build_router(state);
        let me = Uuid::new_v4();

        for body in [
            r#"{"provider": "google"}"#,
            r#"{"provider": "dropbox", "refresh_token": "rt"}"#,
        ] {
            let request = Request::post("/api/refresh-token")
                .header(header::AUTHORIZATION, bearer(me))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_category_write_failure_is_not_a_missing_category() {
        let (state, memory) = test_state("http://localhost:9");
        let app = build_router(state.clone());
        let me = Uuid::new_v4();
        let category = state
            .categories
            .add(
                me,
                planner_types::NewCategoryInput {
                    name: "Errands".to_string(),
                    color: "#22c55e".to_string(),
                    sort_order: None,
                },
            )
            .await
            .unwrap();

        let rename = |id: Uuid| {
            Request::put(format!("/api/categories/{}", id))
                .header(header::AUTHORIZATION, bearer(me))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name": "Chores"}"#))
                .unwrap()
        };
        let remove = |id: Uuid| {
            Request::delete(format!("/api/categories/{}", id))
                .header(header::AUTHORIZATION, bearer(me))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(rename(Uuid::new_v4())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app.clone().oneshot(remove(Uuid::new_v4())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        memory.set_read_only(true);
        let response = app.clone().oneshot(rename(category.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = app.clone().oneshot(remove(category.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        memory.set_read_only(false);
        let response = app.clone().oneshot(rename(category.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(remove(category.id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_noop_drop_leaves_task_untouched() {
        let (state, _) = test_state("http://localhost:9");
        let app = build_router(state.clone());
        let me = Uuid::new_v4();
        let task = state
            .tasks
            .add(me, planner_types::NewTaskInput::titled("Unscheduled"))
            .await
            .unwrap();

        let request = Request::post(format!("/api/tasks/{}/drop", task.id))
            .header(header::AUTHORIZATION, bearer(me))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({
                    "target": {"kind": "bench", "zone": "all"},
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let returned: Task = serde_json::from_slice(&body).unwrap();
        assert_eq!(returned, task);
    }
}
