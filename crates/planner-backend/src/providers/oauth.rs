//! Authorization URLs and token endpoint exchanges for both providers.

use planner_types::Provider;
use reqwest::Client;
use serde::Deserialize;

use super::{json, ProviderError, ProviderResult};
use crate::config::{ClientCredentials, ProviderEndpoints};

const GOOGLE_LINK_SCOPES: &str = "openid email https://www.googleapis.com/auth/calendar.events.readonly";
const GOOGLE_LOGIN_SCOPES: &str =
    "openid email profile https://www.googleapis.com/auth/calendar.events.readonly";
const MICROSOFT_SCOPES: &str = "openid profile email User.Read Tasks.ReadWrite offline_access";
const MICROSOFT_REFRESH_SCOPES: &str = "offline_access User.Read Tasks.ReadWrite";

fn default_expires_in() -> i64 {
    3600
}

/// Token endpoint answer for both the code and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    google: ClientCredentials,
    azure: Option<ClientCredentials>,
    endpoints: ProviderEndpoints,
}

impl OAuthClient {
    pub fn new(
        http: Client,
        google: ClientCredentials,
        azure: Option<ClientCredentials>,
        endpoints: ProviderEndpoints,
    ) -> Self {
        Self {
            http,
            google,
            azure,
            endpoints,
        }
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.credentials(provider).is_ok()
    }

    fn credentials(&self, provider: Provider) -> ProviderResult<&ClientCredentials> {
        match provider {
            Provider::Google => Ok(&self.google),
            Provider::Azure => self
                .azure
                .as_ref()
                .ok_or(ProviderError::NotConfigured(Provider::Azure)),
        }
    }

    fn token_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::Google => &self.endpoints.google_token_url,
            Provider::Azure => &self.endpoints.microsoft_token_url,
        }
    }

    /// Google login URL. Offline access so the login also yields a
    /// refresh token for the calendar.
    pub fn login_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.endpoints.google_auth_url,
            urlencoding::encode(&self.google.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GOOGLE_LOGIN_SCOPES),
            urlencoding::encode(state),
        )
    }

    /// Account linking URL with a PKCE `S256` challenge.
    pub fn authorization_url(
        &self,
        provider: Provider,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> ProviderResult<String> {
        let credentials = self.credentials(provider)?;
        let (base, scopes, extra) = match provider {
            Provider::Google => (
                &self.endpoints.google_auth_url,
                GOOGLE_LINK_SCOPES,
                "&access_type=offline&prompt=consent",
            ),
            Provider::Azure => (
                &self.endpoints.microsoft_auth_url,
                MICROSOFT_SCOPES,
                "&response_mode=query",
            ),
        };

        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256{}",
            base,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scopes),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
            extra,
        ))
    }

    /// Authorization code grant. `code_verifier` is absent for the login
    /// flow, which does not use PKCE.
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> ProviderResult<TokenGrant> {
        let credentials = self.credentials(provider)?;
        let mut form = vec![
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        if provider == Provider::Azure {
            form.push(("scope", MICROSOFT_SCOPES));
        }

        let response = self
            .http
            .post(self.token_url(provider))
            .form(&form)
            .send()
            .await?;
        json(response).await
    }

    /// Refresh token grant. Microsoft needs the scopes repeated.
    pub async fn refresh(&self, provider: Provider, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let credentials = self.credentials(provider)?;
        let mut form = vec![
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if provider == Provider::Azure {
            form.push(("scope", MICROSOFT_REFRESH_SCOPES));
        }

        let response = self
            .http
            .post(self.token_url(provider))
            .form(&form)
            .send()
            .await?;
        json(response).await
    }
}
