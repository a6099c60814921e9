use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod analytics;
pub mod api;
pub mod redirect;
pub mod scheduling;
pub mod text_enum;
pub mod views;

use text_enum::text_enum;

pub use api::*;
pub use text_enum::ParseEnumError;

text_enum! {
    /// Priority of a task, shown as a coloured badge.
    pub enum Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

text_enum! {
    pub enum TaskStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

text_enum! {
    /// Repeat rule for a task; completing a recurring task spawns its successor.
    pub enum Recurrence {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

impl Recurrence {
    /// The next occurrence after `previous`.
    ///
    /// Month arithmetic is calendar based and clamps to the end of shorter
    /// months (Jan 31 + 1 month = Feb 28/29). Returns `None` only when the
    /// result would fall outside chrono's representable range.
    pub fn next_after(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Daily => previous.checked_add_signed(Duration::days(1)),
            Recurrence::Weekly => previous.checked_add_signed(Duration::weeks(1)),
            Recurrence::Monthly => previous.checked_add_months(Months::new(1)),
            Recurrence::Yearly => previous.checked_add_months(Months::new(12)),
        }
    }
}

text_enum! {
    /// Where a task or category came from.
    pub enum Origin {
        Local => "local",
        MicrosoftTodo => "microsoft_todo",
    }
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Local
    }
}

text_enum! {
    /// External account system supplying events or tasks.
    pub enum Provider {
        Google => "google",
        Azure => "azure",
    }
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::Azure => "Microsoft",
        }
    }
}

/// Task row, column order matching the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Task {
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
    /// The provider's own id for this task, unique per (user, origin).
    pub external_id: Option<String>,
    /// Remote due date as of the last sync pass.
    pub external_due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Whether edits to this task must be mirrored to a provider.
    pub fn is_external(&self) -> bool {
        self.origin != Origin::Local && self.external_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub sort_order: i32,
    pub origin: Origin,
    /// Provider list id for mirrored categories.
    pub external_id: Option<String>,
    /// Email of the linked account that owns the mirrored list.
    pub external_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored OAuth credential for one linked provider account.
///
/// Deliberately not `Serialize`: tokens never leave the server. Use
/// [`IntegrationAccount`] for API responses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct IntegrationToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: Provider,
    pub account_email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationToken {
    /// Expired, or expiring within `margin` of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display colours handed out to linked calendar accounts, by position.
pub const ACCOUNT_COLORS: &[&str] = &[
    "#4285F4", "#0F9D58", "#F4B400", "#DB4437", "#AB47BC", "#00ACC1",
];

pub fn account_color(index: usize) -> &'static str {
    ACCOUNT_COLORS[index % ACCOUNT_COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_weekly_recurrence_adds_seven_days() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = Recurrence::Weekly.next_after(start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_monthly_recurrence_clamps_to_month_end() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 9, 30, 0).unwrap();
        let next = Recurrence::Monthly.next_after(start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_yearly_and_daily_recurrence() {
        let start = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(
            Recurrence::Daily.next_after(start).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Yearly.next_after(start).unwrap(),
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_token_refresh_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = IntegrationToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider: Provider::Google,
            account_email: "me@example.com".to_string(),
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: now + Duration::minutes(4),
            is_primary: true,
            created_at: now,
            updated_at: now,
        };
        assert!(token.needs_refresh(now, Duration::minutes(5)));
        assert!(!token.needs_refresh(now - Duration::minutes(2), Duration::minutes(5)));
    }

    #[test]
    fn test_account_colors_wrap() {
        assert_eq!(account_color(0), account_color(ACCOUNT_COLORS.len()));
    }
}
