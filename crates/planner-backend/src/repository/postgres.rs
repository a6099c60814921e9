use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{pooled_connection::deadpool::Object, AsyncPgConnection};
use planner_types::{
    Category, CategoryPatch, IntegrationToken, Origin, Profile, ProfilePatch, Provider, Task,
    TaskPatch,
};
use uuid::Uuid;

use super::{
    CategoryRepository, IdentityConflict, IntegrationRepository, ProfileRepository,
    TaskRepository,
};
use crate::db::{self, DbPool};
use crate::models::{
    CategoryChangeset, NewCategory, NewIntegration, NewProfile, NewTask, ProfileChangeset,
    TaskChangeset,
};

const IDENTITY_CONSTRAINT: &str = "user_integrations_identity_key";

/// [`Store`](super::Store) over the Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .context("Database connection unavailable")
    }
}

#[async_trait]
impl TaskRepository for PgStore {
    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        db::tasks::list_for_user(&mut conn, user_id).await
    }

    async fn list_tasks_by_origin(&self, user_id: Uuid, origin: Origin) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        db::tasks::list_by_origin(&mut conn, user_id, origin).await
    }

    async fn get_task(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        db::tasks::get(&mut conn, user_id, id).await
    }

    async fn find_task_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        db::tasks::find_by_external(&mut conn, user_id, origin, external_id).await
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task> {
        let mut conn = self.conn().await?;
        db::tasks::create(&mut conn, task)
            .await
            .context("Failed to insert task")
    }

    async fn update_task(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        db::tasks::update(&mut conn, user_id, id, &TaskChangeset::from(patch))
            .await
            .context("Failed to update task")
    }

    async fn complete_tasks(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        db::tasks::complete(&mut conn, user_id, ids, at).await
    }

    async fn delete_task(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        db::tasks::delete(&mut conn, user_id, id).await
    }
}

#[async_trait]
impl CategoryRepository for PgStore {
    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        let mut conn = self.conn().await?;
        db::categories::list_for_user(&mut conn, user_id).await
    }

    async fn get_category(&self, user_id: Uuid, id: Uuid) -> Result<Option<Category>> {
        let mut conn = self.conn().await?;
        db::categories::get(&mut conn, user_id, id).await
    }

    async fn find_category_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Category>> {
        let mut conn = self.conn().await?;
        db::categories::find_by_external(&mut conn, user_id, origin, external_id).await
    }

    async fn max_sort_order(&self, user_id: Uuid) -> Result<Option<i32>> {
        let mut conn = self.conn().await?;
        db::categories::max_sort_order(&mut conn, user_id).await
    }

    async fn insert_category(&self, category: NewCategory) -> Result<Category> {
        let mut conn = self.conn().await?;
        db::categories::create(&mut conn, category)
            .await
            .context("Failed to insert category")
    }

    async fn update_category(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: &CategoryPatch,
    ) -> Result<Option<Category>> {
        let mut conn = self.conn().await?;
        db::categories::update(&mut conn, user_id, id, &CategoryChangeset::from(patch))
            .await
            .context("Failed to update category")
    }

    async fn delete_category(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        db::categories::delete(&mut conn, user_id, id).await
    }
}

#[async_trait]
impl IntegrationRepository for PgStore {
    async fn list_integrations(
        &self,
        user_id: Uuid,
        provider: Option<Provider>,
    ) -> Result<Vec<IntegrationToken>> {
        let mut conn = self.conn().await?;
        db::integrations::list_for_user(&mut conn, user_id, provider).await
    }

    async fn users_with_provider(&self, provider: Provider) -> Result<Vec<Uuid>> {
        let mut conn = self.conn().await?;
        db::integrations::users_with_provider(&mut conn, provider).await
    }

    async fn upsert_integration(&self, integration: NewIntegration) -> Result<IntegrationToken> {
        let provider = integration.provider;
        let account_email = integration.account_email.clone();
        let mut conn = self.conn().await?;

        match db::integrations::upsert(&mut conn, integration).await {
            Ok(row) => Ok(row),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some(IDENTITY_CONSTRAINT) =>
            {
                Err(IdentityConflict {
                    provider,
                    account_email,
                }
                .into())
            }
            Err(e) => Err(e).context("Failed to store integration"),
        }
    }

    async fn update_integration_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn().await?;
        db::integrations::update_tokens(&mut conn, id, access_token, refresh_token, expires_at)
            .await
    }

    async fn set_primary_integration(
        &self,
        user_id: Uuid,
        provider: Provider,
        account_email: &str,
    ) -> Result<bool> {
        let mut conn = self.conn().await?;
        db::integrations::set_primary(&mut conn, user_id, provider, account_email).await
    }

    async fn delete_integration(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        db::integrations::delete(&mut conn, id).await
    }

    async fn unlink_identity(&self, provider: Provider, account_email: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        db::integrations::unlink_identity(&mut conn, provider, account_email).await
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let mut conn = self.conn().await?;
        db::profiles::get(&mut conn, id).await
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let mut conn = self.conn().await?;
        db::profiles::get_by_email(&mut conn, email).await
    }

    async fn insert_profile(&self, profile: NewProfile) -> Result<Profile> {
        let mut conn = self.conn().await?;
        db::profiles::create(&mut conn, profile)
            .await
            .context("Failed to insert profile")
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<Option<Profile>> {
        let mut conn = self.conn().await?;
        db::profiles::update(&mut conn, id, &ProfileChangeset::from(patch)).await
    }
}
