//! Which side wins, field by field, when a remote task meets its local copy.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use planner_types::{Priority, Task, TaskPatch, TaskStatus};
use uuid::Uuid;

use crate::providers::TodoItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Overwritten from the provider on every pass.
    Remote,
    /// Never touched by sync.
    Local,
    /// Kept locally until the provider's value changes between passes.
    LocalUntilRemoteChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Title,
    Description,
    Priority,
    Status,
    Reminder,
    Category,
    Duration,
    Recurrence,
    Schedule,
}

pub fn authority(field: TaskField) -> Authority {
    match field {
        TaskField::Title
        | TaskField::Description
        | TaskField::Priority
        | TaskField::Status
        | TaskField::Reminder
        | TaskField::Category => Authority::Remote,
        TaskField::Duration | TaskField::Recurrence => Authority::Local,
        TaskField::Schedule => Authority::LocalUntilRemoteChanges,
    }
}

/// Whether a local edit of `field` is mirrored to the provider.
pub fn is_mirrored(field: TaskField) -> bool {
    authority(field) != Authority::Local
}

/// The provider's view of a task, already mapped to local vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTaskState {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub category_id: Option<Uuid>,
}

impl RemoteTaskState {
    pub fn from_item(item: &TodoItem, category_id: Uuid) -> Self {
        Self {
            title: item.title.clone(),
            description: item.description(),
            priority: item.priority(),
            status: item.task_status(),
            due_at: item.due_at(),
            reminder_at: item.reminder_at(),
            category_id: Some(category_id),
        }
    }
}

/// The due value Graph keeps for a local schedule: To Do stores dates only,
/// so the echo of any time of day is midnight UTC of that day.
pub fn stored_due(scheduled_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    scheduled_at.map(|at| at.date_naive().and_time(NaiveTime::MIN).and_utc())
}

fn due_date(at: Option<DateTime<Utc>>) -> Option<NaiveDate> {
    at.map(|at| at.date_naive())
}

/// Patch that brings `existing` in line with `remote`. Empty when nothing
/// changed.
pub fn merge_remote(existing: &Task, remote: &RemoteTaskState, now: DateTime<Utc>) -> TaskPatch {
    merge_with(authority, existing, remote, now)
}

/// Merge decided field by field through `table`. Fields other than the
/// schedule keep no remembered remote value, so `LocalUntilRemoteChanges`
/// behaves like `Remote` for them.
fn merge_with(
    table: impl Fn(TaskField) -> Authority,
    existing: &Task,
    remote: &RemoteTaskState,
    now: DateTime<Utc>,
) -> TaskPatch {
    let pulls = |field: TaskField| table(field) != Authority::Local;
    let mut patch = TaskPatch::default();

    if pulls(TaskField::Title) && existing.title != remote.title {
        patch.title = Some(remote.title.clone());
    }
    if pulls(TaskField::Description) && existing.description != remote.description {
        patch.description = Some(remote.description.clone());
    }
    if pulls(TaskField::Priority) && existing.priority != remote.priority {
        patch.priority = Some(remote.priority);
    }
    if pulls(TaskField::Status) && existing.status != remote.status {
        patch.status = Some(remote.status);
        patch.completed_at = Some(match remote.status {
            TaskStatus::Completed => Some(existing.completed_at.unwrap_or(now)),
            _ => None,
        });
    }
    if pulls(TaskField::Reminder) && existing.reminder_at != remote.reminder_at {
        patch.reminder_at = Some(remote.reminder_at);
    }
    if pulls(TaskField::Category) && existing.category_id != remote.category_id {
        patch.category_id = Some(remote.category_id);
    }

    let take_due = match table(TaskField::Schedule) {
        Authority::Remote => true,
        Authority::Local => false,
        Authority::LocalUntilRemoteChanges => {
            due_date(existing.external_due_at) != due_date(remote.due_at)
        }
    };
    if take_due && existing.scheduled_at != remote.due_at {
        patch.scheduled_at = Some(remote.due_at);
    }
    if existing.external_due_at != remote.due_at {
        patch.external_due_at = Some(remote.due_at);
    }

    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use planner_types::{Origin, Recurrence};

    fn synced_task() -> Task {
        let due = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Renew passport".to_string(),
            description: None,
            duration_minutes: 90,
            priority: Priority::Medium,
            status: TaskStatus::Todo,
            scheduled_at: Some(Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()),
            completed_at: None,
            reminder_at: None,
            recurrence: Some(Recurrence::Yearly),
            category_id: Some(Uuid::nil()),
            origin: Origin::MicrosoftTodo,
            external_id: Some("remote-1".to_string()),
            external_due_at: Some(due),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn remote_of(task: &Task) -> RemoteTaskState {
        RemoteTaskState {
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: task.status,
            due_at: task.external_due_at,
            reminder_at: task.reminder_at,
            category_id: task.category_id,
        }
    }

    #[test]
    fn test_unchanged_remote_yields_empty_patch() {
        let task = synced_task();
        let patch = merge_remote(&task, &remote_of(&task), Utc::now());
        assert!(patch.is_empty());
    }

    #[test]
    fn test_local_schedule_survives_until_due_date_changes() {
        let task = synced_task();
        let mut remote = remote_of(&task);
        remote.title = "Renew passport!".to_string();

        let patch = merge_remote(&task, &remote, Utc::now());
        assert_eq!(patch.title.as_deref(), Some("Renew passport!"));
        assert_eq!(patch.scheduled_at, None);
        assert_eq!(patch.duration_minutes, None);
        assert_eq!(patch.recurrence, None);

        let new_due = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        remote.due_at = Some(new_due);
        let patch = merge_remote(&task, &remote, Utc::now());
        assert_eq!(patch.scheduled_at, Some(Some(new_due)));
        assert_eq!(patch.external_due_at, Some(Some(new_due)));
    }

    #[test]
    fn test_removed_due_date_unschedules() {
        let task = synced_task();
        let mut remote = remote_of(&task);
        remote.due_at = None;

        let patch = merge_remote(&task, &remote, Utc::now());
        assert_eq!(patch.scheduled_at, Some(None));
        assert_eq!(patch.external_due_at, Some(None));
    }

    #[test]
    fn test_reopened_remote_clears_completion() {
        let mut task = synced_task();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());

        let patch = merge_remote(&task, &remote_of(&synced_task()), Utc::now());
        assert_eq!(patch.status, Some(TaskStatus::Todo));
        assert_eq!(patch.completed_at, Some(None));
    }

    #[test]
    fn test_midnight_echo_of_same_day_keeps_local_time() {
        let mut task = synced_task();
        task.scheduled_at = Some(Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap());
        task.external_due_at = Some(Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap());
        let mut remote = remote_of(&task);
        remote.due_at = stored_due(task.scheduled_at);

        let patch = merge_remote(&task, &remote, Utc::now());
        assert_eq!(patch.scheduled_at, None);
        assert_eq!(patch.external_due_at, Some(remote.due_at));
    }

    #[test]
    fn test_stored_due_is_utc_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        assert_eq!(
            stored_due(Some(at)),
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(stored_due(None), None);
    }

    #[test]
    fn test_table_decides_each_field() {
        let task = synced_task();
        let mut remote = remote_of(&task);
        remote.title = "Renew passport!".to_string();
        remote.priority = Priority::High;
        remote.due_at = Some(Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap());

        let title_local = |field: TaskField| match field {
            TaskField::Title => Authority::Local,
            other => authority(other),
        };
        let patch = merge_with(title_local, &task, &remote, Utc::now());
        assert_eq!(patch.title, None);
        assert_eq!(patch.priority, Some(Priority::High));
        assert_eq!(patch.scheduled_at, Some(remote.due_at));

        let schedule_local = |field: TaskField| match field {
            TaskField::Schedule => Authority::Local,
            other => authority(other),
        };
        let patch = merge_with(schedule_local, &task, &remote, Utc::now());
        assert_eq!(patch.title.as_deref(), Some("Renew passport!"));
        assert_eq!(patch.scheduled_at, None);
        assert_eq!(patch.external_due_at, Some(remote.due_at));

        let mut unchanged_due = remote_of(&task);
        unchanged_due.due_at = task.external_due_at;
        let schedule_remote = |field: TaskField| match field {
            TaskField::Schedule => Authority::Remote,
            other => authority(other),
        };
        let patch = merge_with(schedule_remote, &task, &unchanged_due, Utc::now());
        assert_eq!(patch.scheduled_at, Some(task.external_due_at));
    }

    #[test]
    fn test_authority_table() {
        assert_eq!(authority(TaskField::Duration), Authority::Local);
        assert_eq!(authority(TaskField::Recurrence), Authority::Local);
        assert_eq!(
            authority(TaskField::Schedule),
            Authority::LocalUntilRemoteChanges
        );
        assert!(is_mirrored(TaskField::Title));
        assert!(is_mirrored(TaskField::Schedule));
        assert!(!is_mirrored(TaskField::Duration));
    }
}
