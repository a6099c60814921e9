// Insert and changeset structs for Diesel. Row types live in planner-types.
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use planner_types::{
    CategoryPatch, Origin, Priority, ProfilePatch, Provider, Recurrence, TaskPatch, TaskStatus,
};
use uuid::Uuid;

use crate::schema::{categories, profiles, tasks, user_integrations};

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub priority: Priority,
    pub status: TaskStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub category_id: Option<Uuid>,
    pub origin: Origin,
    pub external_id: Option<String>,
    pub external_due_at: Option<DateTime<Utc>>,
}

impl NewTask {
    /// A local task owned by `user_id` with every optional column empty.
    pub fn new(user_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            description: None,
            duration_minutes: 30,
            priority: Priority::default(),
            status: TaskStatus::default(),
            scheduled_at: None,
            completed_at: None,
            reminder_at: None,
            recurrence: None,
            category_id: None,
            origin: Origin::Local,
            external_id: None,
            external_due_at: None,
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskChangeset {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub duration_minutes: Option<i32>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub reminder_at: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Option<Recurrence>>,
    pub category_id: Option<Option<Uuid>>,
    pub external_id: Option<Option<String>>,
    pub external_due_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskPatch> for TaskChangeset {
    fn from(patch: &TaskPatch) -> Self {
        Self {
            title: patch.title.clone(),
            description: patch.description.clone(),
            duration_minutes: patch.duration_minutes,
            priority: patch.priority,
            status: patch.status,
            scheduled_at: patch.scheduled_at,
            completed_at: patch.completed_at,
            reminder_at: patch.reminder_at,
            recurrence: patch.recurrence,
            category_id: patch.category_id,
            external_id: patch.external_id.clone(),
            external_due_at: patch.external_due_at,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub sort_order: i32,
    pub origin: Origin,
    pub external_id: Option<String>,
    pub external_account: Option<String>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = categories)]
pub struct CategoryChangeset {
    pub name: Option<String>,
    pub color: Option<String>,
    pub sort_order: Option<i32>,
    pub external_account: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CategoryPatch> for CategoryChangeset {
    fn from(patch: &CategoryPatch) -> Self {
        Self {
            name: patch.name.clone(),
            color: patch.color.clone(),
            sort_order: patch.sort_order,
            external_account: patch.external_account.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Insert (or token refresh, on conflict) of a linked provider account.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_integrations)]
pub struct NewIntegration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: Provider,
    pub account_email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = profiles)]
pub struct ProfileChangeset {
    pub full_name: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProfilePatch> for ProfileChangeset {
    fn from(patch: &ProfilePatch) -> Self {
        Self {
            full_name: patch.full_name.clone(),
            username: patch.username.clone(),
            avatar_url: patch.avatar_url.clone(),
            updated_at: Utc::now(),
        }
    }
}
