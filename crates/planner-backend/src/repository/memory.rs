//! In-memory [`Store`](super::Store) for tests. Mirrors the Postgres
//! constraints the services rely on: unique identities, category detach on
//! delete, and owner scoping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use planner_types::{
    Category, CategoryPatch, IntegrationToken, Origin, Profile, ProfilePatch, Provider, Task,
    TaskPatch, TaskStatus,
};
use uuid::Uuid;

use super::{
    CategoryRepository, IdentityConflict, IntegrationRepository, ProfileRepository,
    TaskRepository,
};
use crate::models::{NewCategory, NewIntegration, NewProfile, NewTask};

#[derive(Default)]
struct Tables {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    integrations: Vec<IntegrationToken>,
    profiles: Vec<Profile>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tables)
    }

    pub fn task_count(&self) -> usize {
        self.with(|t| t.tasks.len())
    }

    pub fn integration_count(&self) -> usize {
        self.with(|t| t.integrations.len())
    }

    /// Direct row access for arranging test state.
    pub fn seed_integration(&self, row: IntegrationToken) {
        self.with(|t| t.integrations.push(row));
    }

    /// While set, category and token writes fail like a lost connection.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            bail!("store is read-only");
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<Task>> {
        Ok(self.with(|t| {
            let mut tasks: Vec<Task> = t
                .tasks
                .iter()
                .filter(|task| task.user_id == user_id)
                .cloned()
                .collect();
            tasks.sort_by_key(|task| (task.scheduled_at, task.created_at));
            tasks
        }))
    }

    async fn list_tasks_by_origin(&self, user_id: Uuid, origin: Origin) -> Result<Vec<Task>> {
        Ok(self.with(|t| {
            t.tasks
                .iter()
                .filter(|task| task.user_id == user_id && task.origin == origin)
                .cloned()
                .collect()
        }))
    }

    async fn get_task(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>> {
        Ok(self.with(|t| {
            t.tasks
                .iter()
                .find(|task| task.user_id == user_id && task.id == id)
                .cloned()
        }))
    }

    async fn find_task_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Task>> {
        Ok(self.with(|t| {
            t.tasks
                .iter()
                .find(|task| {
                    task.user_id == user_id
                        && task.origin == origin
                        && task.external_id.as_deref() == Some(external_id)
                })
                .cloned()
        }))
    }

    async fn insert_task(&self, new: NewTask) -> Result<Task> {
        self.with(|t| {
            if let Some(external_id) = &new.external_id {
                let duplicate = t.tasks.iter().any(|task| {
                    task.user_id == new.user_id
                        && task.origin == new.origin
                        && task.external_id.as_ref() == Some(external_id)
                });
                if duplicate {
                    bail!("duplicate key value violates unique constraint \"tasks_external_key\"");
                }
            }
            let now = Utc::now();
            let task = Task {
                id: new.id,
                user_id: new.user_id,
                title: new.title,
                description: new.description,
                duration_minutes: new.duration_minutes,
                priority: new.priority,
                status: new.status,
                scheduled_at: new.scheduled_at,
                completed_at: new.completed_at,
                reminder_at: new.reminder_at,
                recurrence: new.recurrence,
                category_id: new.category_id,
                origin: new.origin,
                external_id: new.external_id,
                external_due_at: new.external_due_at,
                created_at: now,
                updated_at: now,
            };
            t.tasks.push(task.clone());
            Ok(task)
        })
    }

    async fn update_task(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Option<Task>> {
        Ok(self.with(|t| {
            t.tasks
                .iter_mut()
                .find(|task| task.user_id == user_id && task.id == id)
                .map(|task| {
                    patch.apply_to(task);
                    task.updated_at = Utc::now();
                    task.clone()
                })
        }))
    }

    async fn complete_tasks(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.with(|t| {
            let mut count = 0;
            for task in t
                .tasks
                .iter_mut()
                .filter(|task| task.user_id == user_id && ids.contains(&task.id))
            {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(at);
                task.updated_at = at;
                count += 1;
            }
            count
        }))
    }

    async fn delete_task(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        Ok(self.with(|t| {
            let before = t.tasks.len();
            t.tasks
                .retain(|task| !(task.user_id == user_id && task.id == id));
            t.tasks.len() != before
        }))
    }
}

#[async_trait]
impl CategoryRepository for MemoryStore {
    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        Ok(self.with(|t| {
            let mut categories: Vec<Category> = t
                .categories
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            categories.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
            categories
        }))
    }

    async fn get_category(&self, user_id: Uuid, id: Uuid) -> Result<Option<Category>> {
        Ok(self.with(|t| {
            t.categories
                .iter()
                .find(|c| c.user_id == user_id && c.id == id)
                .cloned()
        }))
    }

    async fn find_category_by_external(
        &self,
        user_id: Uuid,
        origin: Origin,
        external_id: &str,
    ) -> Result<Option<Category>> {
        Ok(self.with(|t| {
            t.categories
                .iter()
                .find(|c| {
                    c.user_id == user_id
                        && c.origin == origin
                        && c.external_id.as_deref() == Some(external_id)
                })
                .cloned()
        }))
    }

    async fn max_sort_order(&self, user_id: Uuid) -> Result<Option<i32>> {
        Ok(self.with(|t| {
            t.categories
                .iter()
                .filter(|c| c.user_id == user_id)
                .map(|c| c.sort_order)
                .max()
        }))
    }

    async fn insert_category(&self, new: NewCategory) -> Result<Category> {
        Ok(self.with(|t| {
            let now = Utc::now();
            let category = Category {
                id: new.id,
                user_id: new.user_id,
                name: new.name,
                color: new.color,
                sort_order: new.sort_order,
                origin: new.origin,
                external_id: new.external_id,
                external_account: new.external_account,
                created_at: now,
                updated_at: now,
            };
            t.categories.push(category.clone());
            category
        }))
    }

    async fn update_category(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: &CategoryPatch,
    ) -> Result<Option<Category>> {
        self.writable()?;
        Ok(self.with(|t| {
            t.categories
                .iter_mut()
                .find(|c| c.user_id == user_id && c.id == id)
                .map(|c| {
                    if let Some(name) = &patch.name {
                        c.name = name.clone();
                    }
                    if let Some(color) = &patch.color {
                        c.color = color.clone();
                    }
                    if let Some(sort_order) = patch.sort_order {
                        c.sort_order = sort_order;
                    }
                    if let Some(account) = &patch.external_account {
                        c.external_account = account.clone();
                    }
                    c.updated_at = Utc::now();
                    c.clone()
                })
        }))
    }

    async fn delete_category(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        self.writable()?;
        Ok(self.with(|t| {
            let before = t.categories.len();
            t.categories.retain(|c| !(c.user_id == user_id && c.id == id));
            let deleted = t.categories.len() != before;
            if deleted {
                for task in t.tasks.iter_mut().filter(|task| task.category_id == Some(id)) {
                    task.category_id = None;
                }
            }
            deleted
        }))
    }
}

#[async_trait]
impl IntegrationRepository for MemoryStore {
    async fn list_integrations(
        &self,
        user_id: Uuid,
        provider: Option<Provider>,
    ) -> Result<Vec<IntegrationToken>> {
        Ok(self.with(|t| {
            let mut rows: Vec<IntegrationToken> = t
                .integrations
                .iter()
                .filter(|row| row.user_id == user_id)
                .filter(|row| provider.map_or(true, |p| row.provider == p))
                .cloned()
                .collect();
            rows.sort_by_key(|row| (row.provider.as_str(), row.created_at));
            rows
        }))
    }

    async fn users_with_provider(&self, provider: Provider) -> Result<Vec<Uuid>> {
        Ok(self.with(|t| {
            let mut users: Vec<Uuid> = t
                .integrations
                .iter()
                .filter(|row| row.provider == provider)
                .map(|row| row.user_id)
                .collect();
            users.sort();
            users.dedup();
            users
        }))
    }

    async fn upsert_integration(&self, new: NewIntegration) -> Result<IntegrationToken> {
        self.with(|t| {
            let held_elsewhere = t.integrations.iter().any(|row| {
                row.provider == new.provider
                    && row.account_email == new.account_email
                    && row.user_id != new.user_id
            });
            if held_elsewhere {
                return Err(IdentityConflict {
                    provider: new.provider,
                    account_email: new.account_email.clone(),
                }
                .into());
            }

            let now = Utc::now();
            if let Some(row) = t.integrations.iter_mut().find(|row| {
                row.user_id == new.user_id
                    && row.provider == new.provider
                    && row.account_email == new.account_email
            }) {
                row.access_token = new.access_token;
                row.refresh_token = new.refresh_token;
                row.expires_at = new.expires_at;
                row.updated_at = now;
                return Ok(row.clone());
            }

            let row = IntegrationToken {
                id: new.id,
                user_id: new.user_id,
                provider: new.provider,
                account_email: new.account_email,
                access_token: new.access_token,
                refresh_token: new.refresh_token,
                expires_at: new.expires_at,
                is_primary: new.is_primary,
                created_at: now,
                updated_at: now,
            };
            t.integrations.push(row.clone());
            Ok(row)
        })
    }

    async fn update_integration_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.writable()?;
        self.with(|t| {
            if let Some(row) = t.integrations.iter_mut().find(|row| row.id == id) {
                row.access_token = access_token.to_string();
                row.refresh_token = refresh_token.map(str::to_string);
                row.expires_at = expires_at;
                row.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn set_primary_integration(
        &self,
        user_id: Uuid,
        provider: Provider,
        account_email: &str,
    ) -> Result<bool> {
        Ok(self.with(|t| {
            let mine = |row: &IntegrationToken| row.user_id == user_id && row.provider == provider;
            if !t
                .integrations
                .iter()
                .any(|row| mine(row) && row.account_email == account_email)
            {
                return false;
            }
            for row in t.integrations.iter_mut().filter(|row| mine(row)) {
                row.is_primary = row.account_email == account_email;
            }
            true
        }))
    }

    async fn delete_integration(&self, id: Uuid) -> Result<bool> {
        Ok(self.with(|t| {
            let before = t.integrations.len();
            t.integrations.retain(|row| row.id != id);
            t.integrations.len() != before
        }))
    }

    async fn unlink_identity(&self, provider: Provider, account_email: &str) -> Result<usize> {
        Ok(self.with(|t| {
            let before = t.integrations.len();
            t.integrations
                .retain(|row| !(row.provider == provider && row.account_email == account_email));
            before - t.integrations.len()
        }))
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self.with(|t| t.profiles.iter().find(|p| p.id == id).cloned()))
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let email = email.to_lowercase();
        Ok(self.with(|t| t.profiles.iter().find(|p| p.email == email).cloned()))
    }

    async fn insert_profile(&self, new: NewProfile) -> Result<Profile> {
        Ok(self.with(|t| {
            let now = Utc::now();
            let profile = Profile {
                id: new.id,
                email: new.email,
                full_name: new.full_name,
                username: new.username,
                avatar_url: new.avatar_url,
                created_at: now,
                updated_at: now,
            };
            t.profiles.push(profile.clone());
            profile
        }))
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<Option<Profile>> {
        Ok(self.with(|t| {
            t.profiles.iter_mut().find(|p| p.id == id).map(|p| {
                if let Some(full_name) = &patch.full_name {
                    p.full_name = full_name.clone();
                }
                if let Some(username) = &patch.username {
                    p.username = username.clone();
                }
                if let Some(avatar_url) = &patch.avatar_url {
                    p.avatar_url = avatar_url.clone();
                }
                p.updated_at = Utc::now();
                p.clone()
            })
        }))
    }
}
