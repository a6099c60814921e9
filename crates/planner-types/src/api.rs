//! Request and response bodies for the HTTP API.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::scheduling::{DropGeometry, DropTarget};
use crate::views::{BoardView, DayBucket, ListGroups};
use crate::{Origin, Priority, Provider, Recurrence, Task, TaskStatus};

/// Deserializes a present field (including an explicit `null`) as `Some`,
/// so `Option<Option<T>>` can tell "absent" from "clear".
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_duration() -> i32 {
    30
}

fn default_category_color() -> String {
    "#6366f1".to_string()
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub origin: Origin,
}

impl NewTaskInput {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            duration_minutes: default_duration(),
            priority: Priority::default(),
            status: TaskStatus::default(),
            scheduled_at: None,
            reminder_at: None,
            recurrence: None,
            category_id: None,
            origin: Origin::Local,
        }
    }
}

/// Partial update of a task. Absent fields are left alone; nullable fields
/// sent as `null` are cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub reminder_at: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurrence: Option<Option<Recurrence>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<Option<Uuid>>,

    // Server-maintained columns. Never read from or written to the wire.
    #[serde(skip)]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip)]
    pub external_id: Option<Option<String>>,
    #[serde(skip)]
    pub external_due_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether the patch touches a field mirrored to a task provider.
    pub fn touches_remote_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.status.is_some()
            || self.scheduled_at.is_some()
    }

    /// Applies the patch to an in-memory copy of a task.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(duration) = self.duration_minutes {
            task.duration_minutes = duration;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(scheduled_at) = self.scheduled_at {
            task.scheduled_at = scheduled_at;
        }
        if let Some(reminder_at) = self.reminder_at {
            task.reminder_at = reminder_at;
        }
        if let Some(recurrence) = self.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(category_id) = self.category_id {
            task.category_id = category_id;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = completed_at;
        }
        if let Some(external_id) = &self.external_id {
            task.external_id = external_id.clone();
        }
        if let Some(external_due_at) = self.external_due_at {
            task.external_due_at = external_due_at;
        }
    }
}

/// Body of `POST /api/tasks/:id/drop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRequest {
    pub target: DropTarget,
    #[serde(default)]
    pub geometry: Option<DropGeometry>,
    /// Viewer's offset from UTC in minutes, east positive.
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

// ============================================================================
// Categories and profile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategoryInput {
    pub name: String,
    #[serde(default = "default_category_color")]
    pub color: String,
    /// Appended after the last category when omitted.
    #[serde(default)]
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
    #[serde(skip)]
    pub external_account: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub full_name: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_url: Option<Option<String>>,
}

// ============================================================================
// Auth and integrations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInitResponse {
    pub auth_url: String,
}

/// A linked provider account as shown on the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationAccount {
    pub provider: Provider,
    pub account_email: String,
    pub is_primary: bool,
    pub expires_at: DateTime<Utc>,
    pub color: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub authorization_url: String,
    pub state: String,
}

/// Query string of `GET /api/integrations/callback`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCallbackQuery {
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /api/integrations/callback`: the raw URL fragment the
/// browser received, or its already-split fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentCallbackRequest {
    pub provider: Provider,
    #[serde(default)]
    pub fragment: Option<String>,
    #[serde(default)]
    pub provider_token: Option<String>,
    #[serde(default)]
    pub provider_refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPrimaryRequest {
    pub account_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectQuery {
    #[serde(default)]
    pub account_email: Option<String>,
}

/// Body of `POST /api/refresh-token`. Both fields are optional on the wire
/// so a missing value can be answered with 400 rather than 422.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

// ============================================================================
// Calendar
// ============================================================================

/// Start or end of a calendar event: timed events carry `dateTime`,
/// all-day events only `date`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default)]
    pub date_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl EventTime {
    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    /// Instant used for ordering. All-day events sort at UTC midnight.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        if let Some(date_time) = self.date_time {
            return Some(date_time.with_timezone(&Utc));
        }
        self.date
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
    }
}

/// A remote calendar event tagged with the account it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub html_link: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub account_email: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarWindow {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

// ============================================================================
// Sync, realtime, board
// ============================================================================

/// Outcome of one task-list sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub accounts: usize,
    pub lists: usize,
    pub created: usize,
    pub updated: usize,
    pub completed: usize,
    pub failed_accounts: Vec<String>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.accounts += other.accounts;
        self.lists += other.lists;
        self.created += other.created;
        self.updated += other.updated;
        self.completed += other.completed;
        self.failed_accounts.extend(other.failed_accounts);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Tasks,
    Categories,
    Profiles,
    UserIntegrations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Realtime notification: something in `table` changed for `user_id`.
/// Clients refetch on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub user_id: Uuid,
    pub table: ChangeTable,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardQuery {
    #[serde(default)]
    pub view: BoardView,
    /// Anchor date in the viewer's timezone; today when omitted.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardResponse {
    pub view: BoardView,
    pub bench: Vec<Task>,
    pub days: Vec<DayBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListGroups>,
    pub missed: Vec<Task>,
}
