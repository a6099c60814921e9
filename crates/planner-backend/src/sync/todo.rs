//! Microsoft To Do: pull every list into categories and tasks, and mirror
//! local edits of synced tasks back to Graph.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use planner_types::{
    Category, CategoryPatch, ChangeKind, ChangeTable, Origin, Provider, SyncReport, Task,
    TaskPatch,
};
use uuid::Uuid;

use super::ownership::{is_mirrored, merge_remote, RemoteTaskState, TaskField};
use super::SyncError;
use crate::models::{NewCategory, NewTask};
use crate::providers::{
    importance_for, remote_status_for, text_body, GraphDateTime, GraphTodoClient, TodoItemDraft,
    TodoList,
};
use crate::realtime::ChangeFeed;
use crate::repository::Store;
use crate::tokens::{Credential, CredentialPass, TokenStore};

const TODO_LIST_COLOR: &str = "#2564CF";
const DEFAULT_DURATION_MINUTES: i32 = 30;

/// Where a pushed task landed remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink {
    pub external_id: String,
    /// Local category of the list the task was created in, if known.
    pub category_id: Option<Uuid>,
}

#[derive(Default)]
struct ListOutcome {
    created: usize,
    updated: usize,
    completed: usize,
}

#[derive(Clone)]
pub struct MicrosoftTodoSync {
    store: Arc<dyn Store>,
    tokens: TokenStore,
    changes: ChangeFeed,
}

impl MicrosoftTodoSync {
    pub fn new(store: Arc<dyn Store>, tokens: TokenStore, changes: ChangeFeed) -> Self {
        Self {
            store,
            tokens,
            changes,
        }
    }

    fn graph(&self) -> &GraphTodoClient {
        &self.tokens.providers().graph
    }

    /// One pass over every Microsoft account the user linked.
    pub async fn sync_user(&self, user_id: Uuid) -> Result<SyncReport, SyncError> {
        let credentials = self.tokens.credentials(user_id, Provider::Azure).await?;
        let mut report = SyncReport {
            accounts: credentials.len(),
            ..Default::default()
        };

        for credential in &credentials {
            match self.sync_account(user_id, credential, &mut report).await {
                Ok(()) => {}
                Err(SyncError::Provider(e)) => {
                    if e.is_unauthorized() {
                        tracing::warn!(
                            "{} rejected its token, skipping it this sync",
                            credential.account_email
                        );
                    } else {
                        tracing::warn!(
                            "To Do sync failed for {}: {}",
                            credential.account_email,
                            e
                        );
                    }
                    report.failed_accounts.push(credential.account_email.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if report.created + report.updated + report.completed > 0 {
            self.changes
                .publish(user_id, ChangeTable::Tasks, ChangeKind::Update);
        }
        if report.lists > 0 {
            self.changes
                .publish(user_id, ChangeTable::Categories, ChangeKind::Update);
        }
        tracing::info!(
            "To Do sync for {}: {} lists, {} created, {} updated, {} completed, {} failed accounts",
            user_id,
            report.lists,
            report.created,
            report.updated,
            report.completed,
            report.failed_accounts.len()
        );
        Ok(report)
    }

    async fn sync_account(
        &self,
        user_id: Uuid,
        credential: &Credential,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let token = &credential.access_token;
        let lists = self.graph().list_lists(token).await?;

        for list in &lists {
            let category = self
                .upsert_category(user_id, list, &credential.account_email)
                .await?;

            let items = match self.graph().list_active_tasks(token, &list.id).await {
                Ok(items) => items,
                Err(e) if e.is_unauthorized() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Skipping list {} ({}): {}", list.display_name, list.id, e);
                    continue;
                }
            };
            report.lists += 1;

            let outcome = self.sync_list(user_id, &category, &items).await?;
            report.created += outcome.created;
            report.updated += outcome.updated;
            report.completed += outcome.completed;
        }
        Ok(())
    }

    async fn upsert_category(
        &self,
        user_id: Uuid,
        list: &TodoList,
        account_email: &str,
    ) -> anyhow::Result<Category> {
        let existing = self
            .store
            .find_category_by_external(user_id, Origin::MicrosoftTodo, &list.id)
            .await?;

        match existing {
            Some(category) => {
                let owner_changed = category.external_account.as_deref() != Some(account_email);
                if category.name == list.display_name && !owner_changed {
                    return Ok(category);
                }
                let patch = CategoryPatch {
                    name: Some(list.display_name.clone()),
                    external_account: Some(Some(account_email.to_string())),
                    ..Default::default()
                };
                Ok(self
                    .store
                    .update_category(user_id, category.id, &patch)
                    .await?
                    .unwrap_or(category))
            }
            None => {
                let sort_order = self
                    .store
                    .max_sort_order(user_id)
                    .await?
                    .map_or(0, |max| max + 1);
                tracing::debug!("New To Do list {} for {}", list.display_name, account_email);
                self.store
                    .insert_category(NewCategory {
                        id: Uuid::new_v4(),
                        user_id,
                        name: list.display_name.clone(),
                        color: TODO_LIST_COLOR.to_string(),
                        sort_order,
                        origin: Origin::MicrosoftTodo,
                        external_id: Some(list.id.clone()),
                        external_account: Some(account_email.to_string()),
                    })
                    .await
            }
        }
    }

    async fn sync_list(
        &self,
        user_id: Uuid,
        category: &Category,
        items: &[crate::providers::TodoItem],
    ) -> anyhow::Result<ListOutcome> {
        let now = Utc::now();
        let mut outcome = ListOutcome::default();

        for item in items {
            let remote = RemoteTaskState::from_item(item, category.id);
            let existing = self
                .store
                .find_task_by_external(user_id, Origin::MicrosoftTodo, &item.id)
                .await?;

            match existing {
                Some(task) => {
                    let patch = merge_remote(&task, &remote, now);
                    if !patch.is_empty() {
                        tracing::debug!("Updating {} from To Do", task.id);
                        self.store.update_task(user_id, task.id, &patch).await?;
                        outcome.updated += 1;
                    }
                }
                None => {
                    let mut task = NewTask::new(user_id, remote.title);
                    task.description = remote.description;
                    task.duration_minutes = DEFAULT_DURATION_MINUTES;
                    task.priority = remote.priority;
                    task.status = remote.status;
                    task.scheduled_at = remote.due_at;
                    task.reminder_at = remote.reminder_at;
                    task.category_id = remote.category_id;
                    task.origin = Origin::MicrosoftTodo;
                    task.external_id = Some(item.id.clone());
                    task.external_due_at = remote.due_at;
                    tracing::debug!("Importing To Do task {}", item.id);
                    self.store.insert_task(task).await?;
                    outcome.created += 1;
                }
            }
        }

        // Only this list's tasks are reconciled, and only after it was
        // fetched in full.
        let active: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let missing: Vec<Uuid> = self
            .store
            .list_tasks_by_origin(user_id, Origin::MicrosoftTodo)
            .await?
            .into_iter()
            .filter(|task| task.category_id == Some(category.id) && !task.is_completed())
            .filter(|task| {
                task.external_id
                    .as_deref()
                    .is_some_and(|id| !active.contains(id))
            })
            .map(|task| task.id)
            .collect();
        if !missing.is_empty() {
            outcome.completed = self.store.complete_tasks(user_id, &missing, now).await?;
        }

        Ok(outcome)
    }

    /// Account and list a synced task lives in. Falls back to the primary
    /// account when the owning account is gone.
    async fn locate(
        &self,
        user_id: Uuid,
        task: &Task,
        pass: &CredentialPass,
    ) -> anyhow::Result<Option<(Credential, String, Option<Uuid>)>> {
        if let Some(category_id) = task.category_id {
            if let Some(category) = self.store.get_category(user_id, category_id).await? {
                if let (Origin::MicrosoftTodo, Some(list_id)) = (category.origin, category.external_id) {
                    let credential = category
                        .external_account
                        .as_deref()
                        .and_then(|email| pass.for_account(email))
                        .or_else(|| pass.primary());
                    return Ok(credential.map(|c| (c.clone(), list_id, Some(category.id))));
                }
            }
        }
        Ok(None)
    }

    /// Default list of the first account that accepts its token. Accounts
    /// answering 401 are left out for the rest of the pass.
    async fn default_target(
        &self,
        user_id: Uuid,
        pass: &mut CredentialPass,
    ) -> Result<Option<(Credential, String, Option<Uuid>)>, SyncError> {
        while let Some(credential) = pass.primary().cloned() {
            match self.default_list(user_id, &credential).await {
                Ok(Some((list_id, category_id))) => {
                    return Ok(Some((credential, list_id, category_id)))
                }
                Ok(None) => {
                    tracing::warn!("{} has no To Do lists", credential.account_email);
                    return Ok(None);
                }
                Err(SyncError::Provider(e)) if e.is_unauthorized() => {
                    pass.mark_unusable(&credential.account_email)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn default_list(
        &self,
        user_id: Uuid,
        credential: &Credential,
    ) -> Result<Option<(String, Option<Uuid>)>, SyncError> {
        let lists = self.graph().list_lists(&credential.access_token).await?;
        let Some(list) = lists.iter().find(|l| l.is_default()).or(lists.first()) else {
            return Ok(None);
        };
        let category = self
            .store
            .find_category_by_external(user_id, Origin::MicrosoftTodo, &list.id)
            .await?;
        Ok(Some((list.id.clone(), category.map(|c| c.id))))
    }

    async fn pass(&self, user_id: Uuid) -> Option<CredentialPass> {
        match self.tokens.pass(user_id, Provider::Azure).await {
            Ok(pass) if !pass.is_empty() => Some(pass),
            Ok(_) => {
                tracing::warn!("No Microsoft account linked for {}, not pushing", user_id);
                None
            }
            Err(e) => {
                tracing::warn!("Could not load Microsoft credentials for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Creates the task remotely, in its category's list or the account's
    /// default list. Failures are logged and yield `None`.
    pub async fn push_create(&self, user_id: Uuid, task: &Task) -> Option<RemoteLink> {
        let mut pass = self.pass(user_id).await?;
        match self.try_push_create(user_id, task, &mut pass).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("Could not create {} in To Do: {}", task.id, e);
                None
            }
        }
    }

    async fn try_push_create(
        &self,
        user_id: Uuid,
        task: &Task,
        pass: &mut CredentialPass,
    ) -> Result<Option<RemoteLink>, SyncError> {
        let located = match self.locate(user_id, task, pass).await? {
            Some(found) => Some(found),
            None => self.default_target(user_id, pass).await?,
        };
        let Some((credential, list_id, category_id)) = located else {
            return Ok(None);
        };

        let draft = TodoItemDraft {
            title: Some(task.title.clone()),
            body: task.description.as_deref().map(text_body),
            importance: Some(importance_for(task.priority).to_string()),
            status: Some(remote_status_for(task.status).to_string()),
            due_date_time: task.scheduled_at.map(|at| Some(GraphDateTime::utc(at))),
        };
        let created = self
            .graph()
            .create_task(&credential.access_token, &list_id, &draft)
            .await?;
        tracing::info!("Created To Do task {} for {}", created.id, task.id);

        Ok(Some(RemoteLink {
            external_id: created.id,
            category_id,
        }))
    }

    /// Mirrors a local edit. Returns whether the provider accepted it.
    pub async fn push_update(&self, user_id: Uuid, task: &Task, patch: &TaskPatch) -> bool {
        let Some(external_id) = task.external_id.as_deref() else {
            return false;
        };
        let draft = draft_for_patch(patch);
        if draft.is_empty() {
            return false;
        }
        let Some(pass) = self.pass(user_id).await else {
            return false;
        };

        let located = match self.locate(user_id, task, &pass).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::warn!("Cannot find the To Do list of {}, not pushing", task.id);
                return false;
            }
            Err(e) => {
                tracing::warn!("Could not look up the list of {}: {}", task.id, e);
                return false;
            }
        };
        let (credential, list_id, _) = located;

        match self
            .graph()
            .update_task(&credential.access_token, &list_id, external_id, &draft)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Could not update To Do task {}: {}", external_id, e);
                false
            }
        }
    }

    pub async fn push_delete(&self, user_id: Uuid, task: &Task) {
        let Some(external_id) = task.external_id.as_deref() else {
            return;
        };
        let Some(pass) = self.pass(user_id).await else {
            return;
        };
        let (credential, list_id, _) = match self.locate(user_id, task, &pass).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::warn!("Cannot find the To Do list of {}, not deleting remotely", task.id);
                return;
            }
            Err(e) => {
                tracing::warn!("Could not look up the list of {}: {}", task.id, e);
                return;
            }
        };

        if let Err(e) = self
            .graph()
            .delete_task(&credential.access_token, &list_id, external_id)
            .await
        {
            tracing::warn!("Could not delete To Do task {}: {}", external_id, e);
        }
    }
}

/// The mirrored part of a local patch, in Graph's vocabulary.
fn draft_for_patch(patch: &TaskPatch) -> TodoItemDraft {
    let mut draft = TodoItemDraft::default();
    if is_mirrored(TaskField::Title) {
        draft.title = patch.title.clone();
    }
    if is_mirrored(TaskField::Description) {
        draft.body = patch
            .description
            .as_ref()
            .map(|d| text_body(d.as_deref().unwrap_or("")));
    }
    if is_mirrored(TaskField::Priority) {
        draft.importance = patch.priority.map(|p| importance_for(p).to_string());
    }
    if is_mirrored(TaskField::Status) {
        draft.status = patch.status.map(|s| remote_status_for(s).to_string());
    }
    if is_mirrored(TaskField::Schedule) {
        draft.due_date_time = patch
            .scheduled_at
            .map(|at| at.map(GraphDateTime::utc));
    }
    draft
}
