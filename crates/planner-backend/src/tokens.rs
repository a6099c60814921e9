//! Integration token store.
//!
//! Owns the `user_integrations` rows: hands out fresh credentials to the
//! sync adapters, runs the PKCE link flow, and turns OAuth redirects into
//! verified, persisted accounts. A token is only ever stored after the
//! provider has confirmed whose it is.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use planner_types::redirect::{plan_redirect, IgnoreReason, RedirectPlan, RedirectResult};
use planner_types::{
    account_color, ChangeKind, ChangeTable, ConnectResponse, IntegrationAccount, IntegrationToken,
    Provider,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::models::NewIntegration;
use crate::providers::{ProviderError, ProviderResult, Providers, TokenGrant};
use crate::realtime::ChangeFeed;
use crate::repository::{IdentityConflict, Store};

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_MINUTES: i64 = 5;
const PENDING_LINK_TTL_MINUTES: i64 = 10;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unknown or expired link state")]
    UnknownState,

    /// The provider would not say whose token it is, so it was discarded.
    #[error("could not verify {provider} token: {source}")]
    Verification {
        provider: Provider,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A usable access token for one linked account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub integration_id: Uuid,
    pub provider: Provider,
    pub account_email: String,
    pub access_token: String,
    pub is_primary: bool,
    pub expires_at: DateTime<Utc>,
    /// Position among the user's accounts of this provider, oldest first.
    /// Drives the display colour.
    pub position: usize,
}

impl Credential {
    fn from_row(row: &IntegrationToken, position: usize) -> Self {
        Self {
            integration_id: row.id,
            provider: row.provider,
            account_email: row.account_email.clone(),
            access_token: row.access_token.clone(),
            is_primary: row.is_primary,
            expires_at: row.expires_at,
            position,
        }
    }

    pub fn color(&self) -> &'static str {
        account_color(self.position)
    }
}

/// Credentials for the duration of one sync pass. An account that answers
/// 401 is excluded for the rest of the pass.
#[derive(Debug, Clone, Default)]
pub struct CredentialPass {
    credentials: Vec<Credential>,
    unusable: HashSet<String>,
}

impl CredentialPass {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            unusable: HashSet::new(),
        }
    }

    pub fn usable(&self) -> impl Iterator<Item = &Credential> {
        self.credentials
            .iter()
            .filter(|c| !self.unusable.contains(&c.account_email))
    }

    pub fn mark_unusable(&mut self, account_email: &str) {
        tracing::warn!("Excluding {} for the rest of this pass", account_email);
        self.unusable.insert(account_email.to_string());
    }

    pub fn primary(&self) -> Option<&Credential> {
        self.usable().next()
    }

    pub fn for_account(&self, account_email: &str) -> Option<&Credential> {
        self.usable().find(|c| c.account_email == account_email)
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PendingLink {
    user_id: Uuid,
    provider: Provider,
    verifier: String,
    created_at: DateTime<Utc>,
}

impl PendingLink {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(PENDING_LINK_TTL_MINUTES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(IntegrationAccount),
    Ignored(IgnoreReason),
}

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn Store>,
    providers: Providers,
    changes: ChangeFeed,
    pending: Arc<Mutex<HashMap<String, PendingLink>>>,
    redirect_uri: String,
}

fn pkce_pair() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Stored account emails are trimmed and lowercased.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn account_view(row: &IntegrationToken, index: usize) -> IntegrationAccount {
    IntegrationAccount {
        provider: row.provider,
        account_email: row.account_email.clone(),
        is_primary: row.is_primary,
        expires_at: row.expires_at,
        color: account_color(index).to_string(),
        connected_at: row.created_at,
    }
}

impl TokenStore {
    pub fn new(
        store: Arc<dyn Store>,
        providers: Providers,
        changes: ChangeFeed,
        redirect_uri: String,
    ) -> Self {
        Self {
            store,
            providers,
            changes,
            pending: Arc::new(Mutex::new(HashMap::new())),
            redirect_uri,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingLink>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All linked accounts of `provider`, primary first then oldest, with
    /// tokens refreshed when they are about to expire.
    pub async fn credentials(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Vec<Credential>, TokenError> {
        let rows = self
            .store
            .list_integrations(user_id, Some(provider))
            .await?;
        let mut ranked: Vec<(usize, IntegrationToken)> = rows.into_iter().enumerate().collect();
        ranked.sort_by_key(|(_, row)| !row.is_primary);

        let now = Utc::now();
        let mut credentials = Vec::with_capacity(ranked.len());
        for (position, row) in &ranked {
            if row.needs_refresh(now, Duration::minutes(REFRESH_MARGIN_MINUTES)) {
                credentials.push(self.refresh_row(row, *position, now).await?);
            } else {
                credentials.push(Credential::from_row(row, *position));
            }
        }
        Ok(credentials)
    }

    pub async fn pass(&self, user_id: Uuid, provider: Provider) -> Result<CredentialPass, TokenError> {
        Ok(CredentialPass::new(self.credentials(user_id, provider).await?))
    }

    /// Refreshes one row. Failures fall back to the stale token so the
    /// caller's request decides whether it is still accepted.
    async fn refresh_row(
        &self,
        row: &IntegrationToken,
        position: usize,
        now: DateTime<Utc>,
    ) -> Result<Credential, TokenError> {
        let Some(refresh_token) = row.refresh_token.as_deref() else {
            tracing::warn!(
                "{} token for {} is expiring and has no refresh token",
                row.provider,
                row.account_email
            );
            return Ok(Credential::from_row(row, position));
        };

        match self.providers.oauth.refresh(row.provider, refresh_token).await {
            Ok(grant) => {
                let expires_at = now + Duration::seconds(grant.expires_in);
                let kept_refresh = grant.refresh_token.as_deref().unwrap_or(refresh_token);
                match self
                    .store
                    .update_integration_tokens(row.id, &grant.access_token, Some(kept_refresh), expires_at)
                    .await
                {
                    Ok(()) => {
                        tracing::debug!("Refreshed {} token for {}", row.provider, row.account_email)
                    }
                    Err(e) => tracing::error!(
                        "Refreshed {} token for {} but could not save it: {:#}",
                        row.provider,
                        row.account_email,
                        e
                    ),
                }

                let mut credential = Credential::from_row(row, position);
                credential.access_token = grant.access_token;
                credential.expires_at = expires_at;
                Ok(credential)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to refresh {} token for {}: {}",
                    row.provider,
                    row.account_email,
                    e
                );
                Ok(Credential::from_row(row, position))
            }
        }
    }

    /// Starts linking an account: records a PKCE verifier under a fresh
    /// state and returns the provider's consent URL.
    pub fn begin_link(&self, user_id: Uuid, provider: Provider) -> Result<ConnectResponse, TokenError> {
        let (verifier, challenge) = pkce_pair();
        let state = Uuid::new_v4().to_string();
        let authorization_url = self.providers.oauth.authorization_url(
            provider,
            &state,
            &challenge,
            &self.redirect_uri,
        )?;

        let now = Utc::now();
        let mut pending = self.pending();
        pending.retain(|_, link| !link.is_expired(now));
        pending.insert(
            state.clone(),
            PendingLink {
                user_id,
                provider,
                verifier,
                created_at: now,
            },
        );

        Ok(ConnectResponse {
            authorization_url,
            state,
        })
    }

    /// Provider a pending link flow was started for.
    pub fn pending_provider(&self, state: &str) -> Option<Provider> {
        let now = Utc::now();
        self.pending()
            .get(state)
            .filter(|link| !link.is_expired(now))
            .map(|link| link.provider)
    }

    fn take_verifier(&self, state: &str, user_id: Uuid, provider: Provider) -> Result<String, TokenError> {
        let link = self.pending().remove(state).ok_or(TokenError::UnknownState)?;
        if link.is_expired(Utc::now()) || link.user_id != user_id || link.provider != provider {
            return Err(TokenError::UnknownState);
        }
        Ok(link.verifier)
    }

    /// Handles a redirect for `requested`: exchanges a code, or verifies
    /// tokens delivered directly, then stores the account.
    pub async fn reconcile_redirect(
        &self,
        user_id: Uuid,
        requested: Provider,
        redirect: RedirectResult,
    ) -> Result<LinkOutcome, TokenError> {
        match plan_redirect(requested, &redirect) {
            RedirectPlan::ExchangeCode { code, state } => {
                let verifier = self.take_verifier(&state, user_id, requested)?;
                let grant = self
                    .providers
                    .oauth
                    .exchange_code(requested, &code, Some(&verifier), &self.redirect_uri)
                    .await?;
                self.verify_and_store(user_id, requested, grant).await
            }
            RedirectPlan::VerifyToken {
                access_token,
                refresh_token,
            } => {
                let grant = TokenGrant {
                    access_token,
                    refresh_token,
                    expires_in: DEFAULT_TOKEN_LIFETIME_SECS,
                };
                self.verify_and_store(user_id, requested, grant).await
            }
            RedirectPlan::Ignore(reason) => {
                tracing::debug!("Ignoring {} redirect: {:?}", requested, reason);
                Ok(LinkOutcome::Ignored(reason))
            }
        }
    }

    async fn identify(&self, provider: Provider, access_token: &str) -> ProviderResult<String> {
        let email = match provider {
            Provider::Google => self.providers.google.identify(access_token).await?.email,
            Provider::Azure => self
                .providers
                .graph
                .identify(access_token)
                .await?
                .email()
                .map(str::to_string)
                .ok_or_else(|| ProviderError::Decode("Graph profile has no email".to_string()))?,
        };
        Ok(normalize_email(&email))
    }

    async fn verify_and_store(
        &self,
        user_id: Uuid,
        provider: Provider,
        grant: TokenGrant,
    ) -> Result<LinkOutcome, TokenError> {
        let account_email = self
            .identify(provider, &grant.access_token)
            .await
            .map_err(|source| TokenError::Verification { provider, source })?;

        let existing = self
            .store
            .list_integrations(user_id, Some(provider))
            .await?;
        let current = existing.iter().find(|row| row.account_email == account_email);

        let integration = NewIntegration {
            id: Uuid::new_v4(),
            user_id,
            provider,
            account_email: account_email.clone(),
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .or_else(|| current.and_then(|row| row.refresh_token.clone())),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
            is_primary: existing.is_empty(),
        };

        let row = match self.store.upsert_integration(integration.clone()).await {
            Ok(row) => row,
            Err(e) if e.downcast_ref::<IdentityConflict>().is_some() => {
                tracing::warn!(
                    "{} account {} was linked to another user, moving it",
                    provider,
                    account_email
                );
                self.store.unlink_identity(provider, &account_email).await?;
                self.store.upsert_integration(integration).await?
            }
            Err(e) => return Err(e.into()),
        };

        let index = existing
            .iter()
            .position(|r| r.account_email == account_email)
            .unwrap_or(existing.len());
        let kind = if current.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.changes.publish(user_id, ChangeTable::UserIntegrations, kind);
        tracing::info!("Linked {} account {}", provider, account_email);

        Ok(LinkOutcome::Linked(account_view(&row, index)))
    }

    /// Linked accounts across providers, coloured by position per provider.
    pub async fn accounts(&self, user_id: Uuid) -> Result<Vec<IntegrationAccount>, TokenError> {
        let rows = self.store.list_integrations(user_id, None).await?;
        let mut seen: HashMap<Provider, usize> = HashMap::new();
        Ok(rows
            .iter()
            .map(|row| {
                let index = seen.entry(row.provider).or_insert(0);
                let view = account_view(row, *index);
                *index += 1;
                view
            })
            .collect())
    }

    /// Removes one account, or all accounts of the provider when no email
    /// is given. Returns how many were removed.
    pub async fn disconnect(
        &self,
        user_id: Uuid,
        provider: Provider,
        account_email: Option<&str>,
    ) -> Result<usize, TokenError> {
        let account_email = account_email.map(normalize_email);
        let rows = self
            .store
            .list_integrations(user_id, Some(provider))
            .await?;
        let (targets, remaining): (Vec<_>, Vec<_>) = rows.into_iter().partition(|row| {
            account_email
                .as_deref()
                .map_or(true, |email| row.account_email == email)
        });

        let mut removed = 0;
        for row in &targets {
            if self.store.delete_integration(row.id).await? {
                removed += 1;
            }
        }

        let lost_primary = targets.iter().any(|row| row.is_primary);
        if lost_primary {
            if let Some(oldest) = remaining.first() {
                self.store
                    .set_primary_integration(user_id, provider, &oldest.account_email)
                    .await?;
                tracing::info!("Promoted {} to primary {} account", oldest.account_email, provider);
            }
        }

        if removed > 0 {
            self.changes
                .publish(user_id, ChangeTable::UserIntegrations, ChangeKind::Delete);
        }
        Ok(removed)
    }

    pub async fn set_primary(
        &self,
        user_id: Uuid,
        provider: Provider,
        account_email: &str,
    ) -> Result<bool, TokenError> {
        let updated = self
            .store
            .set_primary_integration(user_id, provider, &normalize_email(account_email))
            .await?;
        if updated {
            self.changes
                .publish(user_id, ChangeTable::UserIntegrations, ChangeKind::Update);
        }
        Ok(updated)
    }

    /// Bare refresh grant for clients holding their own refresh token.
    pub async fn refresh_exchange(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> ProviderResult<TokenGrant> {
        self.providers.oauth.refresh(provider, refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryStore;
    use crate::repository::IntegrationRepository;
    use crate::test_support::{integration_row, test_config};
    use planner_types::redirect::RedirectPayload;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_store(server: &MockServer) -> (TokenStore, Arc<MemoryStore>) {
        let config = test_config(&server.uri());
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let tokens = TokenStore::new(
            store,
            Providers::from_config(&config),
            ChangeFeed::default(),
            config.integration_redirect_uri(),
        );
        (tokens, memory)
    }

    async fn mock_google_userinfo(server: &MockServer, token: &str, email: &str) {
        Mock::given(method("GET"))
            .and(path("/google/userinfo"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "email": email })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_unverified_token_is_not_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/google/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let (tokens, memory) = token_store(&server);

        let redirect =
            RedirectResult::with_tokens(Provider::Google, "bad-token".to_string(), None);
        let err = tokens
            .reconcile_redirect(Uuid::new_v4(), Provider::Google, redirect)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TokenError::Verification {
                provider: Provider::Google,
                ..
            }
        ));
        assert_eq!(memory.integration_count(), 0);
    }

    #[tokio::test]
    async fn test_first_account_becomes_primary() {
        let server = MockServer::start().await;
        mock_google_userinfo(&server, "tok-a", "A@example.com").await;
        mock_google_userinfo(&server, "tok-b", "b@example.com").await;
        let (tokens, _) = token_store(&server);
        let user = Uuid::new_v4();

        for token in ["tok-a", "tok-b"] {
            let redirect = RedirectResult::with_tokens(Provider::Google, token.to_string(), None);
            tokens
                .reconcile_redirect(user, Provider::Google, redirect)
                .await
                .unwrap();
        }

        let accounts = tokens.accounts(user).await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].account_email, "a@example.com");
        assert!(accounts[0].is_primary);
        assert!(!accounts[1].is_primary);
        assert_ne!(accounts[0].color, accounts[1].color);
    }

    #[tokio::test]
    async fn test_relink_keeps_refresh_token_when_none_returned() {
        let server = MockServer::start().await;
        mock_google_userinfo(&server, "tok-1", "me@example.com").await;
        mock_google_userinfo(&server, "tok-2", "me@example.com").await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();

        let first = RedirectResult::with_tokens(
            Provider::Google,
            "tok-1".to_string(),
            Some("refresh-1".to_string()),
        );
        tokens.reconcile_redirect(user, Provider::Google, first).await.unwrap();
        let second = RedirectResult::with_tokens(Provider::Google, "tok-2".to_string(), None);
        tokens.reconcile_redirect(user, Provider::Google, second).await.unwrap();

        let rows = memory.list_integrations(user, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].access_token, "tok-2");
        assert_eq!(rows[0].refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_identity_moves_to_new_user() {
        let server = MockServer::start().await;
        mock_google_userinfo(&server, "tok", "shared@example.com").await;
        let (tokens, memory) = token_store(&server);
        let old_owner = Uuid::new_v4();
        let new_owner = Uuid::new_v4();
        memory.seed_integration(integration_row(
            old_owner,
            Provider::Google,
            "shared@example.com",
            Utc::now() + Duration::hours(1),
            None,
        ));

        let redirect = RedirectResult::with_tokens(Provider::Google, "tok".to_string(), None);
        let outcome = tokens
            .reconcile_redirect(new_owner, Provider::Google, redirect)
            .await
            .unwrap();

        assert!(matches!(outcome, LinkOutcome::Linked(_)));
        assert!(memory.list_integrations(old_owner, None).await.unwrap().is_empty());
        assert_eq!(memory.list_integrations(new_owner, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_mismatch_is_ignored() {
        let server = MockServer::start().await;
        let (tokens, memory) = token_store(&server);
        let mut redirect = RedirectResult::with_tokens(Provider::Google, "tok".to_string(), None);
        redirect.provider = Some(Provider::Azure);

        let outcome = tokens
            .reconcile_redirect(Uuid::new_v4(), Provider::Google, redirect)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            LinkOutcome::Ignored(IgnoreReason::ProviderMismatch { .. })
        ));
        assert_eq!(memory.integration_count(), 0);
    }

    #[tokio::test]
    async fn test_code_exchange_uses_stored_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ms/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ms-access",
                "refresh_token": "ms-refresh",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/graph/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mail": null,
                "userPrincipalName": "me@outlook.com"
            })))
            .mount(&server)
            .await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();

        let connect = tokens.begin_link(user, Provider::Azure).unwrap();
        assert!(connect.authorization_url.contains("code_challenge="));
        assert_eq!(tokens.pending_provider(&connect.state), Some(Provider::Azure));

        let redirect = RedirectResult {
            provider: None,
            payload: RedirectPayload::AuthorizationCode {
                code: "the-code".to_string(),
                state: Some(connect.state.clone()),
            },
            error: None,
        };
        let outcome = tokens
            .reconcile_redirect(user, Provider::Azure, redirect.clone())
            .await
            .unwrap();
        match outcome {
            LinkOutcome::Linked(account) => assert_eq!(account.account_email, "me@outlook.com"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let rows = memory.list_integrations(user, Some(Provider::Azure)).await.unwrap();
        assert_eq!(rows[0].refresh_token.as_deref(), Some("ms-refresh"));

        // The state is single use.
        let err = tokens
            .reconcile_redirect(user, Provider::Azure, redirect)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::UnknownState));
    }

    #[tokio::test]
    async fn test_state_from_another_user_is_rejected() {
        let server = MockServer::start().await;
        let (tokens, _) = token_store(&server);
        let connect = tokens.begin_link(Uuid::new_v4(), Provider::Google).unwrap();

        let redirect = RedirectResult {
            provider: None,
            payload: RedirectPayload::AuthorizationCode {
                code: "c".to_string(),
                state: Some(connect.state),
            },
            error: None,
        };
        let err = tokens
            .reconcile_redirect(Uuid::new_v4(), Provider::Google, redirect)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::UnknownState));
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();
        memory.seed_integration(integration_row(
            user,
            Provider::Google,
            "me@example.com",
            Utc::now() + Duration::minutes(2),
            Some("refresh-1"),
        ));

        let credentials = tokens.credentials(user, Provider::Google).await.unwrap();
        assert_eq!(credentials[0].access_token, "fresh");

        let rows = memory.list_integrations(user, None).await.unwrap();
        assert_eq!(rows[0].access_token, "fresh");
        assert_eq!(rows[0].refresh_token.as_deref(), Some("refresh-1"));
        assert!(rows[0].expires_at > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_stale_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();
        let mut row = integration_row(
            user,
            Provider::Google,
            "me@example.com",
            Utc::now() - Duration::minutes(1),
            Some("revoked"),
        );
        row.access_token = "stale".to_string();
        memory.seed_integration(row);

        let credentials = tokens.credentials(user, Provider::Google).await.unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].access_token, "stale");
    }

    #[tokio::test]
    async fn test_refreshed_token_is_used_when_saving_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();
        let expires = Utc::now() - Duration::minutes(1);
        let mut first = integration_row(user, Provider::Google, "a@example.com", expires, Some("r1"));
        first.is_primary = true;
        first.access_token = "stale".to_string();
        let second = integration_row(
            user,
            Provider::Google,
            "b@example.com",
            Utc::now() + Duration::hours(1),
            None,
        );
        memory.seed_integration(first);
        memory.seed_integration(second);
        memory.set_read_only(true);

        let credentials = tokens.credentials(user, Provider::Google).await.unwrap();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].access_token, "fresh");
        assert_eq!(credentials[1].account_email, "b@example.com");

        let rows = memory.list_integrations(user, None).await.unwrap();
        let saved = rows.iter().find(|r| r.account_email == "a@example.com").unwrap();
        assert_eq!(saved.access_token, "stale");
    }

    #[tokio::test]
    async fn test_account_email_matching_ignores_case() {
        let server = MockServer::start().await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();
        let expires = Utc::now() + Duration::hours(1);
        let mut first = integration_row(user, Provider::Google, "a@example.com", expires, None);
        first.is_primary = true;
        let mut second = integration_row(user, Provider::Google, "b@example.com", expires, None);
        second.created_at = first.created_at + Duration::seconds(1);
        memory.seed_integration(first);
        memory.seed_integration(second);

        assert!(tokens
            .set_primary(user, Provider::Google, " B@Example.com ")
            .await
            .unwrap());
        let credentials = tokens.credentials(user, Provider::Google).await.unwrap();
        assert_eq!(credentials[0].account_email, "b@example.com");

        let removed = tokens
            .disconnect(user, Provider::Google, Some("A@EXAMPLE.COM"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(memory.integration_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_promotes_oldest_remaining() {
        let server = MockServer::start().await;
        let (tokens, memory) = token_store(&server);
        let user = Uuid::new_v4();
        let expires = Utc::now() + Duration::hours(1);
        let mut primary = integration_row(user, Provider::Google, "a@example.com", expires, None);
        primary.is_primary = true;
        let mut second = integration_row(user, Provider::Google, "b@example.com", expires, None);
        second.created_at = primary.created_at + Duration::seconds(1);
        let mut third = integration_row(user, Provider::Google, "c@example.com", expires, None);
        third.created_at = primary.created_at + Duration::seconds(2);
        memory.seed_integration(primary);
        memory.seed_integration(third);
        memory.seed_integration(second);

        let removed = tokens
            .disconnect(user, Provider::Google, Some("a@example.com"))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let credentials = tokens.credentials(user, Provider::Google).await.unwrap();
        assert_eq!(credentials[0].account_email, "b@example.com");
        assert!(credentials[0].is_primary);
    }

    #[test]
    fn test_credential_pass_skips_unusable_accounts() {
        let credential = |email: &str, primary: bool| Credential {
            integration_id: Uuid::new_v4(),
            provider: Provider::Azure,
            account_email: email.to_string(),
            access_token: "t".to_string(),
            is_primary: primary,
            expires_at: Utc::now(),
            position: 0,
        };
        let mut pass = CredentialPass::new(vec![
            credential("a@example.com", true),
            credential("b@example.com", false),
        ]);

        pass.mark_unusable("a@example.com");
        assert_eq!(pass.primary().unwrap().account_email, "b@example.com");
        assert!(pass.for_account("a@example.com").is_none());
        assert_eq!(pass.usable().count(), 1);
    }

    #[test]
    fn test_pkce_challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = pkce_pair();
        assert_eq!(verifier.len(), 43);
        assert_eq!(
            challenge,
            URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
        );
    }
}
