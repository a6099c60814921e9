use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use planner_types::{Category, IntegrationToken, Origin, Profile, Provider, Task, TaskStatus};
use uuid::Uuid;

use crate::models::{
    CategoryChangeset, NewCategory, NewIntegration, NewProfile, NewTask, ProfileChangeset,
    TaskChangeset,
};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup =
        Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

pub mod tasks {
    use super::*;

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> anyhow::Result<Vec<Task>> {
        use crate::schema::tasks::dsl::*;

        let rows = tasks
            .filter(user_id.eq(owner))
            .order_by((scheduled_at.asc(), created_at.asc()))
            .load::<Task>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn list_by_origin(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_origin: Origin,
    ) -> anyhow::Result<Vec<Task>> {
        use crate::schema::tasks::dsl::*;

        let rows = tasks
            .filter(user_id.eq(owner))
            .filter(origin.eq(task_origin))
            .load::<Task>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn get(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_id: Uuid,
    ) -> anyhow::Result<Option<Task>> {
        use crate::schema::tasks::dsl::*;

        let task = tasks
            .filter(user_id.eq(owner))
            .filter(id.eq(task_id))
            .first::<Task>(conn)
            .await
            .optional()?;

        Ok(task)
    }

    pub async fn find_by_external(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_origin: Origin,
        foreign_id: &str,
    ) -> anyhow::Result<Option<Task>> {
        use crate::schema::tasks::dsl::*;

        let task = tasks
            .filter(user_id.eq(owner))
            .filter(origin.eq(task_origin))
            .filter(external_id.eq(foreign_id))
            .first::<Task>(conn)
            .await
            .optional()?;

        Ok(task)
    }

    pub async fn create(conn: &mut AsyncPgConnection, new_task: NewTask) -> anyhow::Result<Task> {
        use crate::schema::tasks::dsl::*;

        let task = diesel::insert_into(tasks)
            .values(&new_task)
            .get_result::<Task>(conn)
            .await?;

        Ok(task)
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_id: Uuid,
        changes: &TaskChangeset,
    ) -> anyhow::Result<Option<Task>> {
        use crate::schema::tasks::dsl::*;

        let task = diesel::update(tasks.filter(user_id.eq(owner)).filter(id.eq(task_id)))
            .set(changes)
            .get_result::<Task>(conn)
            .await
            .optional()?;

        Ok(task)
    }

    pub async fn complete(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        use crate::schema::tasks::dsl::*;

        let count = diesel::update(
            tasks
                .filter(user_id.eq(owner))
                .filter(id.eq_any(task_ids)),
        )
        .set((
            status.eq(TaskStatus::Completed),
            completed_at.eq(Some(at)),
            updated_at.eq(at),
        ))
        .execute(conn)
        .await?;

        Ok(count)
    }

    pub async fn delete(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        task_id: Uuid,
    ) -> anyhow::Result<bool> {
        use crate::schema::tasks::dsl::*;

        let count = diesel::delete(tasks.filter(user_id.eq(owner)).filter(id.eq(task_id)))
            .execute(conn)
            .await?;

        Ok(count > 0)
    }
}

pub mod categories {
    use super::*;

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> anyhow::Result<Vec<Category>> {
        use crate::schema::categories::dsl::*;

        let rows = categories
            .filter(user_id.eq(owner))
            .order_by((sort_order.asc(), name.asc()))
            .load::<Category>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn get(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        category_id: Uuid,
    ) -> anyhow::Result<Option<Category>> {
        use crate::schema::categories::dsl::*;

        let category = categories
            .filter(user_id.eq(owner))
            .filter(id.eq(category_id))
            .first::<Category>(conn)
            .await
            .optional()?;

        Ok(category)
    }

    pub async fn find_by_external(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        category_origin: Origin,
        foreign_id: &str,
    ) -> anyhow::Result<Option<Category>> {
        use crate::schema::categories::dsl::*;

        let category = categories
            .filter(user_id.eq(owner))
            .filter(origin.eq(category_origin))
            .filter(external_id.eq(foreign_id))
            .first::<Category>(conn)
            .await
            .optional()?;

        Ok(category)
    }

    pub async fn max_sort_order(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> anyhow::Result<Option<i32>> {
        use crate::schema::categories::dsl::*;

        let max = categories
            .filter(user_id.eq(owner))
            .select(diesel::dsl::max(sort_order))
            .first::<Option<i32>>(conn)
            .await?;

        Ok(max)
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_category: NewCategory,
    ) -> anyhow::Result<Category> {
        use crate::schema::categories::dsl::*;

        let category = diesel::insert_into(categories)
            .values(&new_category)
            .get_result::<Category>(conn)
            .await?;

        Ok(category)
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        category_id: Uuid,
        changes: &CategoryChangeset,
    ) -> anyhow::Result<Option<Category>> {
        use crate::schema::categories::dsl::*;

        let category =
            diesel::update(categories.filter(user_id.eq(owner)).filter(id.eq(category_id)))
                .set(changes)
                .get_result::<Category>(conn)
                .await
                .optional()?;

        Ok(category)
    }

    /// Tasks referencing the category are detached by the foreign key.
    pub async fn delete(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        category_id: Uuid,
    ) -> anyhow::Result<bool> {
        use crate::schema::categories::dsl::*;

        let count =
            diesel::delete(categories.filter(user_id.eq(owner)).filter(id.eq(category_id)))
                .execute(conn)
                .await?;

        Ok(count > 0)
    }
}

pub mod integrations {
    use super::*;
    use diesel::upsert::excluded;

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        only: Option<Provider>,
    ) -> anyhow::Result<Vec<IntegrationToken>> {
        use crate::schema::user_integrations::dsl::*;

        let mut query = user_integrations.filter(user_id.eq(owner)).into_boxed();
        if let Some(wanted) = only {
            query = query.filter(provider.eq(wanted));
        }

        let rows = query
            .order_by((provider.asc(), created_at.asc()))
            .load::<IntegrationToken>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn users_with_provider(
        conn: &mut AsyncPgConnection,
        wanted: Provider,
    ) -> anyhow::Result<Vec<Uuid>> {
        use crate::schema::user_integrations::dsl::*;

        let users = user_integrations
            .filter(provider.eq(wanted))
            .select(user_id)
            .distinct()
            .load::<Uuid>(conn)
            .await?;

        Ok(users)
    }

    /// Inserts the account or, when the user already linked it, replaces its
    /// tokens. The primary flag of an existing row is left untouched.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        new_integration: NewIntegration,
    ) -> Result<IntegrationToken, diesel::result::Error> {
        use crate::schema::user_integrations::dsl::*;

        diesel::insert_into(user_integrations)
            .values(&new_integration)
            .on_conflict((user_id, provider, account_email))
            .do_update()
            .set((
                access_token.eq(excluded(access_token)),
                refresh_token.eq(excluded(refresh_token)),
                expires_at.eq(excluded(expires_at)),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<IntegrationToken>(conn)
            .await
    }

    pub async fn update_tokens(
        conn: &mut AsyncPgConnection,
        integration_id: Uuid,
        new_access_token: &str,
        new_refresh_token: Option<&str>,
        new_expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        use crate::schema::user_integrations::dsl::*;

        diesel::update(user_integrations.filter(id.eq(integration_id)))
            .set((
                access_token.eq(new_access_token),
                refresh_token.eq(new_refresh_token),
                expires_at.eq(new_expires_at),
                updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn set_primary(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        wanted: Provider,
        email: &str,
    ) -> anyhow::Result<bool> {
        use crate::schema::user_integrations::dsl::*;

        let exists = user_integrations
            .filter(user_id.eq(owner))
            .filter(provider.eq(wanted))
            .filter(account_email.eq(email))
            .count()
            .get_result::<i64>(conn)
            .await?
            > 0;
        if !exists {
            return Ok(false);
        }

        diesel::update(
            user_integrations
                .filter(user_id.eq(owner))
                .filter(provider.eq(wanted)),
        )
        .set(is_primary.eq(account_email.eq(email)))
        .execute(conn)
        .await?;

        Ok(true)
    }

    pub async fn delete(conn: &mut AsyncPgConnection, integration_id: Uuid) -> anyhow::Result<bool> {
        use crate::schema::user_integrations::dsl::*;

        let count = diesel::delete(user_integrations.filter(id.eq(integration_id)))
            .execute(conn)
            .await?;

        Ok(count > 0)
    }

    /// Removes every row holding `email` for `wanted`, whichever user owns it.
    pub async fn unlink_identity(
        conn: &mut AsyncPgConnection,
        wanted: Provider,
        email: &str,
    ) -> anyhow::Result<usize> {
        use crate::schema::user_integrations::dsl::*;

        let count = diesel::delete(
            user_integrations
                .filter(provider.eq(wanted))
                .filter(account_email.eq(email)),
        )
        .execute(conn)
        .await?;

        Ok(count)
    }
}

pub mod profiles {
    use super::*;

    pub async fn get(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
    ) -> anyhow::Result<Option<Profile>> {
        use crate::schema::profiles::dsl::*;

        let profile = profiles
            .filter(id.eq(profile_id))
            .first::<Profile>(conn)
            .await
            .optional()?;

        Ok(profile)
    }

    pub async fn get_by_email(
        conn: &mut AsyncPgConnection,
        address: &str,
    ) -> anyhow::Result<Option<Profile>> {
        use crate::schema::profiles::dsl::*;

        let profile = profiles
            .filter(email.eq(address.to_lowercase()))
            .first::<Profile>(conn)
            .await
            .optional()?;

        Ok(profile)
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_profile: NewProfile,
    ) -> anyhow::Result<Profile> {
        use crate::schema::profiles::dsl::*;

        let profile = diesel::insert_into(profiles)
            .values(&new_profile)
            .get_result::<Profile>(conn)
            .await?;

        Ok(profile)
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
        changes: &ProfileChangeset,
    ) -> anyhow::Result<Option<Profile>> {
        use crate::schema::profiles::dsl::*;

        let profile = diesel::update(profiles.filter(id.eq(profile_id)))
            .set(changes)
            .get_result::<Profile>(conn)
            .await
            .optional()?;

        Ok(profile)
    }
}
