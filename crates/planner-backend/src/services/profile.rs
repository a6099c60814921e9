use std::sync::Arc;

use anyhow::{Context, Result};
use planner_types::{ChangeKind, ChangeTable, Profile, ProfilePatch};
use uuid::Uuid;

use crate::models::NewProfile;
use crate::realtime::ChangeFeed;
use crate::repository::Store;

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn Store>,
    changes: ChangeFeed,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>, changes: ChangeFeed) -> Self {
        Self { store, changes }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<Profile>> {
        self.store.get_profile(user_id).await
    }

    /// The profile for a verified login email, created on first sign-in.
    pub async fn get_or_create(
        &self,
        email: &str,
        full_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<Profile> {
        let email = email.trim().to_lowercase();
        if let Some(profile) = self.store.find_profile_by_email(&email).await? {
            return Ok(profile);
        }

        tracing::info!("Creating profile for {}", email);
        let profile = self
            .store
            .insert_profile(NewProfile {
                id: Uuid::new_v4(),
                email,
                full_name,
                username: None,
                avatar_url,
            })
            .await
            .context("Failed to create profile")?;
        self.changes
            .publish(profile.id, ChangeTable::Profiles, ChangeKind::Insert);
        Ok(profile)
    }

    pub async fn update(&self, user_id: Uuid, patch: ProfilePatch) -> Option<Profile> {
        match self.store.update_profile(user_id, &patch).await {
            Ok(Some(profile)) => {
                self.changes
                    .publish(user_id, ChangeTable::Profiles, ChangeKind::Update);
                Some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to update profile {}: {:?}", user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_login_email_maps_to_one_profile() {
        let server = MockServer::start().await;
        let (state, _) = test_state(&server.uri());

        let first = state
            .profiles
            .get_or_create("Ada@Example.com", Some("Ada".to_string()), None)
            .await
            .unwrap();
        let again = state
            .profiles
            .get_or_create("ada@example.com ", None, None)
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.email, "ada@example.com");
        assert_eq!(again.full_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_update_sets_and_clears_fields() {
        let server = MockServer::start().await;
        let (state, _) = test_state(&server.uri());
        let profile = state
            .profiles
            .get_or_create("grace@example.com", Some("Grace".to_string()), None)
            .await
            .unwrap();

        let patch: ProfilePatch =
            serde_json::from_str(r#"{"username": "ghopper", "full_name": null}"#).unwrap();
        let updated = state.profiles.update(profile.id, patch).await.unwrap();
        assert_eq!(updated.username.as_deref(), Some("ghopper"));
        assert_eq!(updated.full_name, None);

        assert!(state
            .profiles
            .update(Uuid::new_v4(), ProfilePatch::default())
            .await
            .is_none());
    }
}
