//! Auth-related types and configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (profile id)
    pub sub: Uuid,
    pub email: String,
    /// Display name from Google
    pub name: Option<String>,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// The signed-in user, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
        }
    }
}

/// Auth configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Empty means any verified Google account may sign in.
    pub allowed_emails: Vec<String>,
    pub token_duration_days: i64,
    pub cookie_name: String,
}

impl AuthConfig {
    /// Load auth configuration from environment variables.
    ///
    /// Required env vars:
    /// - `JWT_SECRET`: Secret key for signing JWTs
    ///
    /// Optional:
    /// - `ALLOWED_EMAILS`: Comma-separated list of allowed email addresses
    pub fn from_env() -> Result<Self, String> {
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        let allowed_emails = std::env::var("ALLOWED_EMAILS")
            .map(|list| parse_allowlist(&list))
            .unwrap_or_default();
        if allowed_emails.is_empty() {
            tracing::warn!("ALLOWED_EMAILS not set, any Google account may sign in");
        }

        Ok(Self {
            jwt_secret,
            allowed_emails,
            token_duration_days: 7,
            cookie_name: "auth_token".to_string(),
        })
    }

    /// Check if an email address may sign in.
    pub fn is_email_allowed(&self, email: &str) -> bool {
        self.allowed_emails.is_empty() || self.allowed_emails.contains(&email.to_lowercase())
    }
}

fn parse_allowlist(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
