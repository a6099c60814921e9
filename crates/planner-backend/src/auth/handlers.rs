//! Authentication HTTP handlers.

use axum::extract::Query;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use planner_types::redirect::RedirectResult;
use planner_types::{AuthUserResponse, LoginInitResponse, Provider};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::tokens::LinkOutcome;
use crate::AppState;

use super::{build_auth_cookie, extract_auth_user, jwt};

/// Start Google OAuth login flow.
///
/// Returns a URL that the frontend should redirect the user to.
pub async fn auth_login(State(state): State<AppState>) -> ApiResult<Json<LoginInitResponse>> {
    let csrf_state = uuid::Uuid::new_v4().to_string();
    let auth_url = state
        .tokens
        .providers()
        .oauth
        .login_url(&csrf_state, &state.config.login_redirect_uri());

    Ok(Json(LoginInitResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Handle Google OAuth callback.
///
/// Exchanges the authorization code, validates the email against the
/// allowlist, and sets an auth cookie on success. The Google tokens are
/// offered to the token store so the calendar works right after sign-in.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<AuthCallbackParams>,
) -> Response {
    match handle_callback_inner(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Auth callback error: {:?}", e);
            Redirect::to("/?auth_error=auth_failed").into_response()
        }
    }
}

async fn handle_callback_inner(
    state: &AppState,
    params: AuthCallbackParams,
) -> Result<Response, ApiError> {
    let config = &state.auth_config;

    if let Some(error) = params.error {
        tracing::warn!("Google refused the login: {}", error);
        return Ok(Redirect::to("/?auth_error=access_denied").into_response());
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let providers = state.tokens.providers();
    let grant = match providers
        .oauth
        .exchange_code(
            Provider::Google,
            &code,
            None,
            &state.config.login_redirect_uri(),
        )
        .await
    {
        Ok(grant) => grant,
        Err(e) => {
            tracing::error!("Token exchange failed: {}", e);
            return Ok(Redirect::to("/?auth_error=token_exchange_failed").into_response());
        }
    };

    let identity = providers.google.identify(&grant.access_token).await?;
    tracing::info!("OAuth login attempt from: {}", identity.email);

    if !config.is_email_allowed(&identity.email) {
        tracing::warn!("Unauthorized login attempt from: {}", identity.email);
        return Ok(Redirect::to("/?auth_error=unauthorized_email").into_response());
    }

    let profile = state
        .profiles
        .get_or_create(&identity.email, identity.name.clone(), identity.picture)
        .await?;

    // Continue with login even if the calendar link fails
    let redirect = RedirectResult::with_tokens(
        Provider::Google,
        grant.access_token,
        grant.refresh_token,
    );
    match state
        .tokens
        .reconcile_redirect(profile.id, Provider::Google, redirect)
        .await
    {
        Ok(LinkOutcome::Linked(account)) => {
            tracing::debug!("Login linked calendar account {}", account.account_email)
        }
        Ok(LinkOutcome::Ignored(reason)) => {
            tracing::debug!("Login tokens not linked: {:?}", reason)
        }
        Err(e) => tracing::error!("Failed to store login tokens: {}", e),
    }

    let token = jwt::create_token(config, profile.id, &profile.email, identity.name)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to create token: {}", e)))?;
    let cookie = build_auth_cookie(&config.cookie_name, &token, config.token_duration_days);

    tracing::info!("Successful login for: {}", profile.email);

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/"),
            (header::SET_COOKIE, cookie.as_str()),
        ],
    )
        .into_response())
}

/// Get current authenticated user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match extract_auth_user(&headers, &state.auth_config) {
        Ok(user) => {
            let name = match state.profiles.get(user.user_id).await {
                Ok(Some(profile)) => profile.full_name.or(profile.username),
                _ => None,
            };
            Json(AuthUserResponse {
                id: user.user_id,
                name: name.or(user.name).unwrap_or_else(|| user.email.clone()),
                email: user.email,
            })
            .into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Logout - clear auth cookie.
pub async fn auth_logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        state.auth_config.cookie_name
    );

    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, cookie),
        ],
    )
}
