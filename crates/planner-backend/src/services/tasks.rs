use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use planner_types::{ChangeKind, ChangeTable, NewTaskInput, Origin, Task, TaskPatch, TaskStatus};
use uuid::Uuid;

use crate::models::NewTask;
use crate::realtime::ChangeFeed;
use crate::repository::Store;
use crate::sync::ownership::stored_due;
use crate::sync::MicrosoftTodoSync;

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Store>,
    changes: ChangeFeed,
    todo_sync: MicrosoftTodoSync,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, changes: ChangeFeed, todo_sync: MicrosoftTodoSync) -> Self {
        Self {
            store,
            changes,
            todo_sync,
        }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Task>> {
        self.store
            .list_tasks(user_id)
            .await
            .context("Failed to list tasks")
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>> {
        self.store.get_task(user_id, id).await
    }

    async fn ensure_category(&self, user_id: Uuid, category_id: Option<Uuid>) -> Result<()> {
        if let Some(id) = category_id {
            if self.store.get_category(user_id, id).await?.is_none() {
                bail!("Category {} does not belong to user {}", id, user_id);
            }
        }
        Ok(())
    }

    /// Creates a task. Tasks of origin `microsoft_todo` are also created
    /// remotely and linked to the returned id.
    pub async fn add(&self, user_id: Uuid, input: NewTaskInput) -> Option<Task> {
        match self.try_add(user_id, input).await {
            Ok(task) => {
                self.changes
                    .publish(user_id, ChangeTable::Tasks, ChangeKind::Insert);
                Some(task)
            }
            Err(e) => {
                tracing::error!("Failed to add task for {}: {:?}", user_id, e);
                None
            }
        }
    }

    async fn try_add(&self, user_id: Uuid, input: NewTaskInput) -> Result<Task> {
        self.ensure_category(user_id, input.category_id).await?;

        let mut new_task = NewTask::new(user_id, input.title);
        new_task.description = input.description;
        new_task.duration_minutes = input.duration_minutes;
        new_task.priority = input.priority;
        new_task.status = input.status;
        new_task.scheduled_at = input.scheduled_at;
        new_task.reminder_at = input.reminder_at;
        new_task.recurrence = input.recurrence;
        new_task.category_id = input.category_id;
        new_task.origin = input.origin;
        if input.status == TaskStatus::Completed {
            new_task.completed_at = Some(Utc::now());
        }

        let task = self
            .store
            .insert_task(new_task)
            .await
            .context("Failed to insert task")?;
        if task.origin != Origin::MicrosoftTodo {
            return Ok(task);
        }

        let Some(link) = self.todo_sync.push_create(user_id, &task).await else {
            return Ok(task);
        };
        let patch = TaskPatch {
            external_id: Some(Some(link.external_id)),
            external_due_at: Some(stored_due(task.scheduled_at)),
            category_id: link
                .category_id
                .filter(|_| task.category_id.is_none())
                .map(Some),
            ..Default::default()
        };
        Ok(self
            .store
            .update_task(user_id, task.id, &patch)
            .await?
            .unwrap_or(task))
    }

    /// Applies a partial update. Completing a recurring task creates its
    /// next occurrence; edits of synced tasks are mirrored to the provider.
    pub async fn update(&self, user_id: Uuid, id: Uuid, patch: TaskPatch) -> bool {
        match self.try_update(user_id, id, patch).await {
            Ok(Some(_)) => {
                self.changes
                    .publish(user_id, ChangeTable::Tasks, ChangeKind::Update);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Failed to update task {}: {:?}", id, e);
                false
            }
        }
    }

    async fn try_update(&self, user_id: Uuid, id: Uuid, mut patch: TaskPatch) -> Result<Option<Task>> {
        let Some(existing) = self.store.get_task(user_id, id).await? else {
            tracing::warn!("Task {} not found for {}", id, user_id);
            return Ok(None);
        };
        if let Some(category_id) = patch.category_id {
            self.ensure_category(user_id, category_id).await?;
        }

        let now = Utc::now();
        stamp_completion(&existing, &mut patch, now);

        let Some(updated) = self.store.update_task(user_id, id, &patch).await? else {
            return Ok(None);
        };

        if !existing.is_completed() && updated.is_completed() {
            if let Some(successor) = successor_of(&updated) {
                let next = self
                    .store
                    .insert_task(successor)
                    .await
                    .context("Failed to create the next occurrence")?;
                tracing::info!("Created next occurrence {} of {}", next.id, updated.id);
            }
        }

        if updated.origin == Origin::MicrosoftTodo
            && updated.is_external()
            && patch.touches_remote_fields()
            && self.todo_sync.push_update(user_id, &updated, &patch).await
        {
            if let Some(scheduled_at) = patch.scheduled_at {
                let acknowledged = TaskPatch {
                    external_due_at: Some(stored_due(scheduled_at)),
                    ..Default::default()
                };
                return self.store.update_task(user_id, id, &acknowledged).await;
            }
        }

        Ok(Some(updated))
    }

    /// Deletes the task locally and, for synced tasks, remotely.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> bool {
        let task = match self.store.get_task(user_id, id).await {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!("Failed to load task {}: {:?}", id, e);
                return false;
            }
        };

        match self.store.delete_task(user_id, id).await {
            Ok(true) => {
                if task.origin == Origin::MicrosoftTodo && task.is_external() {
                    self.todo_sync.push_delete(user_id, &task).await;
                }
                self.changes
                    .publish(user_id, ChangeTable::Tasks, ChangeKind::Delete);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!("Failed to delete task {}: {:?}", id, e);
                false
            }
        }
    }
}

/// Keeps `completed_at` consistent with the status the patch sets.
fn stamp_completion(existing: &Task, patch: &mut TaskPatch, now: DateTime<Utc>) {
    match patch.status {
        Some(TaskStatus::Completed) if !existing.is_completed() => {
            patch.completed_at = Some(Some(now));
        }
        Some(TaskStatus::Completed) => {}
        Some(_) => patch.completed_at = Some(None),
        None => {}
    }
}

/// Next occurrence of a recurring task that was just completed.
fn successor_of(task: &Task) -> Option<NewTask> {
    let recurrence = task.recurrence?;
    let scheduled_at = match task.scheduled_at {
        Some(previous) => Some(recurrence.next_after(previous)?),
        None => None,
    };

    let mut next = NewTask::new(task.user_id, task.title.clone());
    next.description = task.description.clone();
    next.duration_minutes = task.duration_minutes;
    next.priority = task.priority;
    next.status = TaskStatus::Todo;
    next.scheduled_at = scheduled_at;
    next.recurrence = Some(recurrence);
    next.category_id = task.category_id;
    next.origin = Origin::Local;
    Some(next)
}
