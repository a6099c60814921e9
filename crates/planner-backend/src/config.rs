use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// OAuth client registration for one provider.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Remote endpoints. Overridable so tests and proxies can stand in for
/// Google and Microsoft.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub google_auth_url: String,
    pub google_token_url: String,
    pub google_userinfo_url: String,
    pub google_api_base: String,
    pub microsoft_auth_url: String,
    pub microsoft_token_url: String,
    pub graph_api_base: String,
}

impl ProviderEndpoints {
    pub fn for_tenant(tenant: &str) -> Self {
        Self {
            google_auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            google_token_url: "https://oauth2.googleapis.com/token".to_string(),
            google_userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            google_api_base: "https://www.googleapis.com".to_string(),
            microsoft_auth_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
                tenant
            ),
            microsoft_token_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant
            ),
            graph_api_base: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }

    fn from_env(tenant: &str) -> Self {
        let defaults = Self::for_tenant(tenant);
        let or_default = |var: &str, default: String| env::var(var).unwrap_or(default);

        Self {
            google_auth_url: defaults.google_auth_url,
            google_token_url: or_default("GOOGLE_TOKEN_URL", defaults.google_token_url),
            google_userinfo_url: or_default("GOOGLE_USERINFO_URL", defaults.google_userinfo_url),
            google_api_base: or_default("GOOGLE_API_BASE", defaults.google_api_base),
            microsoft_auth_url: defaults.microsoft_auth_url,
            microsoft_token_url: or_default("MICROSOFT_TOKEN_URL", defaults.microsoft_token_url),
            graph_api_base: or_default("GRAPH_API_BASE", defaults.graph_api_base),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub public_base_url: String,
    pub google: ClientCredentials,
    /// Microsoft linking is disabled when no Azure app is registered.
    pub azure: Option<ClientCredentials>,
    /// `None` disables the background To Do pass.
    pub todo_sync_interval: Option<Duration>,
    pub cors_allowed_origins: Option<String>,
    pub endpoints: ProviderEndpoints,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let tenant = env::var("AZURE_TENANT").unwrap_or_else(|_| "common".to_string());

        let azure = match (env::var("AZURE_CLIENT_ID"), env::var("AZURE_CLIENT_SECRET")) {
            (Ok(client_id), Ok(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            _ => {
                tracing::warn!("AZURE_CLIENT_ID/AZURE_CLIENT_SECRET not set, Microsoft To Do disabled");
                None
            }
        };

        let todo_sync_secs: u64 = env::var("TODO_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .context("TODO_SYNC_INTERVAL_SECS must be a number of seconds")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            google: ClientCredentials {
                client_id: env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID must be set")?,
                client_secret: env::var("GOOGLE_CLIENT_SECRET")
                    .context("GOOGLE_CLIENT_SECRET must be set")?,
            },
            azure,
            todo_sync_interval: (todo_sync_secs > 0).then(|| Duration::from_secs(todo_sync_secs)),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            endpoints: ProviderEndpoints::from_env(&tenant),
        })
    }

    /// Redirect target for the login flow.
    pub fn login_redirect_uri(&self) -> String {
        format!("{}/api/auth/callback", self.public_base_url)
    }

    /// Redirect target for linking provider accounts.
    pub fn integration_redirect_uri(&self) -> String {
        format!("{}/api/integrations/callback", self.public_base_url)
    }
}
