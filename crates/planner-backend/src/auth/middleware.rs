//! Authentication middleware layer for protecting routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorResponse;
use crate::AppState;

use super::jwt;
use super::types::{AuthConfig, AuthUser, Claims};

type Rejection = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            details: None,
        }),
    )
}

fn authenticate(headers: &HeaderMap, config: &AuthConfig) -> Result<Claims, Rejection> {
    // Cookie first, then Authorization header
    let token = extract_token_from_cookie(headers, &config.cookie_name)
        .or_else(|| extract_token_from_header(headers))
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing authentication"))?;

    let claims = jwt::validate_token(config, &token)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    // The allowlist may have shrunk since the token was issued
    if !config.is_email_allowed(&claims.email) {
        return Err(reject(StatusCode::FORBIDDEN, "Email not authorized"));
    }

    Ok(claims)
}

/// Middleware function that requires authentication.
///
/// Used with `axum::middleware::from_fn_with_state`. Handlers behind it read
/// the caller from `Extension<AuthUser>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.auth_config;

    let claims = match authenticate(request.headers(), config) {
        Ok(claims) => claims,
        Err(rejection) => return rejection.into_response(),
    };

    request
        .extensions_mut()
        .insert(AuthUser::from(claims.clone()));
    let response = next.run(request).await;

    if jwt::should_refresh(&claims) {
        if let Ok(new_token) =
            jwt::create_token(config, claims.sub, &claims.email, claims.name.clone())
        {
            let cookie =
                build_auth_cookie(&config.cookie_name, &new_token, config.token_duration_days);
            let (mut parts, body) = response.into_parts();
            if let Ok(cookie_value) = cookie.parse() {
                parts.headers.insert(header::SET_COOKIE, cookie_value);
            }
            return Response::from_parts(parts, body);
        }
    }

    response
}

fn extract_token_from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == cookie_name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// Build an auth cookie string.
pub fn build_auth_cookie(name: &str, value: &str, days: i64) -> String {
    let max_age = days * 24 * 60 * 60;
    let secure = if std::env::var("RUST_ENV").unwrap_or_default() == "production" {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name, value, max_age, secure
    )
}

/// Extract and validate user from request headers, for routes outside
/// the `require_auth` layer.
pub fn extract_auth_user(headers: &HeaderMap, config: &AuthConfig) -> Result<AuthUser, Rejection> {
    authenticate(headers, config).map(AuthUser::from)
}
