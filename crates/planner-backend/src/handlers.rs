//! JSON API handlers. Every route here sits behind `require_auth` and is
//! scoped to the caller's user id.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Json, Path, Query, RawQuery, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Redirect, Response,
    },
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use planner_types::analytics::{analytics, AnalyticsResponse};
use planner_types::redirect::{IgnoreReason, RedirectPayload, RedirectResult};
use planner_types::scheduling::{plan_drop, viewer_offset};
use planner_types::views::board;
use planner_types::{
    BoardQuery, BoardResponse, CalendarEvent, CalendarWindow, Category, CategoryPatch,
    ConnectResponse, DisconnectQuery, DropRequest, FragmentCallbackRequest, IntegrationAccount,
    NewCategoryInput, NewTaskInput, Profile, ProfilePatch, Provider, RefreshTokenRequest,
    RefreshTokenResponse, SetPrimaryRequest, SyncReport, Task, TaskPatch,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::tokens::LinkOutcome;
use crate::AppState;

// ============================================================================
// Tasks
// ============================================================================

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.tasks.list(user.user_id).await?))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<NewTaskInput>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    if input.title.trim().is_empty() {
        return Err(ApiError::bad_request("Title must not be empty"));
    }
    let task = state
        .tasks
        .add(user.user_id, input)
        .await
        .ok_or_else(|| ApiError::failed("Failed to save task"))?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn load_task(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<Task> {
    state
        .tasks
        .get(user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))
}

async fn apply_task_patch(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    patch: TaskPatch,
) -> ApiResult<Json<Task>> {
    if !state.tasks.update(user_id, id, patch).await {
        return Err(ApiError::failed("Failed to save task"));
    }
    Ok(Json(load_task(state, user_id, id).await?))
}

pub async fn update_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    let task = load_task(&state, user.user_id, id).await?;
    if patch.is_empty() {
        return Ok(Json(task));
    }
    apply_task_patch(&state, user.user_id, id, patch).await
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_task(&state, user.user_id, id).await?;
    if !state.tasks.delete(user.user_id, id).await {
        return Err(ApiError::failed("Failed to delete task"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Applies a board drop. A drop that changes nothing returns the task as is.
pub async fn drop_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<DropRequest>,
) -> ApiResult<Json<Task>> {
    let task = load_task(&state, user.user_id, id).await?;
    let offset = viewer_offset(request.tz_offset_minutes);

    let patch = plan_drop(&task, &request.target, request.geometry.as_ref(), offset)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    match patch {
        Some(patch) => apply_task_patch(&state, user.user_id, id, patch).await,
        None => Ok(Json(task)),
    }
}

// ============================================================================
// Categories
// ============================================================================

pub async fn list_categories(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(state.categories.list(user.user_id).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<NewCategoryInput>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    if input.name.trim().is_empty() {
        return Err(ApiError::bad_request("Name must not be empty"));
    }
    let category = state
        .categories
        .add(user.user_id, input)
        .await
        .ok_or_else(|| ApiError::failed("Failed to save category"))?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn load_category(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<Category> {
    state
        .categories
        .get(user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Category"))
}

pub async fn update_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(patch): Json<CategoryPatch>,
) -> ApiResult<StatusCode> {
    load_category(&state, user.user_id, id).await?;
    if !state.categories.update(user.user_id, id, patch).await {
        return Err(ApiError::failed("Failed to save category"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_category(&state, user.user_id, id).await?;
    if !state.categories.delete(user.user_id, id).await {
        return Err(ApiError::failed("Failed to delete category"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Profile
// ============================================================================

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Profile>> {
    state
        .profiles
        .get(user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Profile"))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<Json<Profile>> {
    state
        .profiles
        .update(user.user_id, patch)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::failed("Failed to save profile"))
}

// ============================================================================
// Integrations
// ============================================================================

pub async fn list_integrations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<IntegrationAccount>>> {
    Ok(Json(state.tokens.accounts(user.user_id).await?))
}

pub async fn connect_integration(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<Provider>,
) -> ApiResult<Json<ConnectResponse>> {
    Ok(Json(state.tokens.begin_link(user.user_id, provider)?))
}

/// Outcome of a link attempt as reported to the browser.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked: Option<IntegrationAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<IgnoreReason>,
}

impl From<LinkOutcome> for LinkResponse {
    fn from(outcome: LinkOutcome) -> Self {
        match outcome {
            LinkOutcome::Linked(account) => Self {
                linked: Some(account),
                ignored: None,
            },
            LinkOutcome::Ignored(reason) => Self {
                linked: None,
                ignored: Some(reason),
            },
        }
    }
}

/// Provider redirect landing for the code flow. Sends the browser back to
/// the settings page either way.
pub async fn integration_callback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    RawQuery(query): RawQuery,
) -> Response {
    let redirect = RedirectResult::from_url_parts(query.as_deref(), None);
    let requested = redirect.provider.or_else(|| match &redirect.payload {
        RedirectPayload::AuthorizationCode {
            state: Some(link_state),
            ..
        } => state.tokens.pending_provider(link_state),
        _ => None,
    });
    let Some(requested) = requested else {
        tracing::warn!("Integration callback without a known provider");
        return Redirect::to("/settings?integration_error=unknown_provider").into_response();
    };

    match state
        .tokens
        .reconcile_redirect(user.user_id, requested, redirect)
        .await
    {
        Ok(LinkOutcome::Linked(account)) => {
            tracing::info!("Linked {} via callback", account.account_email);
            Redirect::to(&format!("/settings?connected={}", requested)).into_response()
        }
        Ok(LinkOutcome::Ignored(reason)) => {
            tracing::info!("Nothing to link from {} callback: {:?}", requested, reason);
            Redirect::to("/settings").into_response()
        }
        Err(e) => {
            tracing::error!("Linking {} failed: {}", requested, e);
            Redirect::to(&format!("/settings?integration_error={}", requested)).into_response()
        }
    }
}

/// Tokens the browser read from a redirect fragment.
pub async fn integration_fragment_callback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<FragmentCallbackRequest>,
) -> ApiResult<Json<LinkResponse>> {
    let redirect = match (request.fragment, request.provider_token) {
        (Some(fragment), _) => RedirectResult::from_url_parts(None, Some(&fragment)),
        (None, Some(token)) => {
            RedirectResult::with_tokens(request.provider, token, request.provider_refresh_token)
        }
        (None, None) => RedirectResult::empty(),
    };

    let outcome = state
        .tokens
        .reconcile_redirect(user.user_id, request.provider, redirect)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn disconnect_integration(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<Provider>,
    Query(query): Query<DisconnectQuery>,
) -> ApiResult<StatusCode> {
    let removed = state
        .tokens
        .disconnect(user.user_id, provider, query.account_email.as_deref())
        .await?;
    if removed == 0 {
        return Err(ApiError::not_found("Integration"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_primary_integration(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<Provider>,
    Json(request): Json<SetPrimaryRequest>,
) -> ApiResult<StatusCode> {
    if state
        .tokens
        .set_primary(user.user_id, provider, &request.account_email)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Integration"))
    }
}

/// Refresh grant on behalf of a client holding its own refresh token.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<Json<RefreshTokenResponse>> {
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing refresh_token"))?;
    let provider = request
        .provider
        .as_deref()
        .and_then(|p| p.parse::<Provider>().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid provider"))?;

    let grant = state
        .tokens
        .refresh_exchange(provider, &refresh_token)
        .await?;
    Ok(Json(RefreshTokenResponse {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_in: grant.expires_in,
    }))
}

// ============================================================================
// Calendar, sync and realtime
// ============================================================================

pub async fn list_calendar_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(window): Query<CalendarWindow>,
) -> ApiResult<Json<Vec<CalendarEvent>>> {
    if window.time_min >= window.time_max {
        return Err(ApiError::bad_request("time_min must be before time_max"));
    }
    Ok(Json(state.calendar.events(user.user_id, &window).await?))
}

pub async fn sync_microsoft_todo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.todo_sync.sync_user(user.user_id).await?))
}

/// Server-sent change notifications for the caller.
pub async fn change_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Change stream opened for {}", user.user_id);
    let events = state.changes.user_stream(user.user_id).map(|change| {
        Ok(Event::default()
            .event("change")
            .json_data(change)
            .unwrap_or_else(|_| Event::default().event("change")))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============================================================================
// Board and analytics
// ============================================================================

pub async fn get_board(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<BoardQuery>,
) -> ApiResult<Json<BoardResponse>> {
    let tasks = state.tasks.list(user.user_id).await?;
    let offset = viewer_offset(query.tz_offset_minutes);
    let now = Utc::now();
    let anchor = query
        .date
        .unwrap_or_else(|| now.with_timezone(&offset).date_naive());
    Ok(Json(board(&tasks, query.view, anchor, offset, now)))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

pub async fn get_analytics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<AnalyticsResponse>> {
    let tasks = state.tasks.list(user.user_id).await?;
    let categories = state.categories.list(user.user_id).await?;
    let offset = viewer_offset(query.tz_offset_minutes);
    let today = Utc::now().with_timezone(&offset).date_naive();
    Ok(Json(analytics(&tasks, &categories, today, offset)))
}
