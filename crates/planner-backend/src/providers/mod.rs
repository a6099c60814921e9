//! HTTP clients for the remote systems: the OAuth token endpoints, Google
//! (userinfo and Calendar) and Microsoft Graph (profile and To Do).

mod google;
mod microsoft;
mod oauth;

use planner_types::Provider;
use reqwest::{Response, StatusCode};
use thiserror::Error;

pub use google::{GoogleCalendarClient, GoogleIdentity};
pub use microsoft::{
    importance_for, remote_status_for, text_body, GraphDateTime, GraphIdentity, GraphTodoClient,
    TodoItem, TodoItemBody, TodoItemDraft, TodoList,
};
pub use oauth::{OAuthClient, TokenGrant};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401 from the provider: the token is revoked or expired.
    #[error("provider rejected the access token")]
    Unauthorized,

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0} is not configured")]
    NotConfigured(Provider),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Unauthorized)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Turns a non-2xx response into a [`ProviderError`].
pub(crate) async fn check(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Unauthorized);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) async fn json<T: serde::de::DeserializeOwned>(response: Response) -> ProviderResult<T> {
    let response = check(response).await?;
    response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

/// The remote clients, sharing one connection pool.
#[derive(Clone)]
pub struct Providers {
    pub oauth: OAuthClient,
    pub google: GoogleCalendarClient,
    pub graph: GraphTodoClient,
}

impl Providers {
    pub fn from_config(config: &AppConfig) -> Self {
        let http = reqwest::Client::new();
        let endpoints = &config.endpoints;
        Self {
            oauth: OAuthClient::new(
                http.clone(),
                config.google.clone(),
                config.azure.clone(),
                endpoints.clone(),
            ),
            google: GoogleCalendarClient::new(
                http.clone(),
                &endpoints.google_api_base,
                &endpoints.google_userinfo_url,
            ),
            graph: GraphTodoClient::new(http, &endpoints.graph_api_base),
        }
    }
}
