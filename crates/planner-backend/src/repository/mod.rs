//! Repository traits for the four planner tables.
//!
//! Services depend on [`Store`] rather than on a connection, so the same
//! logic runs over Postgres ([`PgStore`]) and, in tests, over an in-memory
//! store. Every method that touches user data takes the owning user id.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use planner_types::{
    Category, CategoryPatch, IntegrationToken, Origin, Profile, ProfilePatch, Provider, Task,
    TaskPatch,
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewCategory, NewIntegration, NewProfile, NewTask};

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

/// The external identity is already linked to a different planner user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} account {account_email} is linked to another user")]
pub struct IdentityConflict {
    pub provider: Provider,
    pub account_email: String,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<Task>>;

    async fn list_tasks_by_origin(&self, user_id: Uuid, origin: Origin) -> Result<Vec<Task>>;

    async fn get_task(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>>;

    /// Lookup by the provider's identifier, the key sync upserts on.
    async fn find_task_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Task>>;

    async fn insert_task(&self, task: NewTask) -> Result<Task>;

    /// Returns `None` when no task with that id belongs to the user.
    async fn update_task(&self, user_id: Uuid, id: Uuid, patch: &TaskPatch)
        -> Result<Option<Task>>;

    /// Marks the given tasks completed at `at`. Returns how many changed.
    async fn complete_tasks(&self, user_id: Uuid, ids: &[Uuid], at: DateTime<Utc>)
        -> Result<usize>;

    async fn delete_task(&self, user_id: Uuid, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>>;

    async fn get_category(&self, user_id: Uuid, id: Uuid) -> Result<Option<Category>>;

    async fn find_category_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Category>>;

    async fn max_sort_order(&self, user_id: Uuid) -> Result<Option<i32>>;

    async fn insert_category(&self, category: NewCategory) -> Result<Category>;

    async fn update_category(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: &CategoryPatch,
    ) -> Result<Option<Category>>;

    /// Deletes the category and detaches its tasks.
    async fn delete_category(&self, user_id: Uuid, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    /// Linked accounts, oldest first, optionally for one provider only.
    async fn list_integrations(
        &self,
        user_id: Uuid,
        provider: Option<Provider>,
    ) -> Result<Vec<IntegrationToken>>;

    async fn users_with_provider(&self, provider: Provider) -> Result<Vec<Uuid>>;

    /// Inserts or refreshes the `(user, provider, account_email)` row.
    /// Fails with [`IdentityConflict`] when another user holds the identity.
    async fn upsert_integration(&self, integration: NewIntegration) -> Result<IntegrationToken>;

    async fn update_integration_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_primary_integration(
        &self,
        user_id: Uuid,
        provider: Provider,
        account_email: &str,
    ) -> Result<bool>;

    async fn delete_integration(&self, id: Uuid) -> Result<bool>;

    /// Drops the identity from whichever user holds it.
    async fn unlink_identity(&self, provider: Provider, account_email: &str) -> Result<usize>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>>;

    async fn insert_profile(&self, profile: NewProfile) -> Result<Profile>;

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<Option<Profile>>;
}

/// Everything the services need from persistence.
pub trait Store:
    TaskRepository + CategoryRepository + IntegrationRepository + ProfileRepository
{
}

impl<T> Store for T where
    T: TaskRepository + CategoryRepository + IntegrationRepository + ProfileRepository
{
}
