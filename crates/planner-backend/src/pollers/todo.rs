//! Periodic Microsoft To Do pass over every user with a linked account.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use planner_types::{Provider, SyncReport};

use crate::config::AppConfig;
use crate::repository::Store;
use crate::sync::MicrosoftTodoSync;

/// Configuration for the To Do polling task
#[derive(Debug, Clone)]
pub struct TodoPollerConfig {
    /// How often to run a pass (default: 10 minutes)
    pub poll_interval: Duration,
}

impl Default for TodoPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(600),
        }
    }
}

impl TodoPollerConfig {
    /// `None` when the background pass is disabled or Microsoft is not
    /// configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if config.azure.is_none() {
            return None;
        }
        config.todo_sync_interval.map(|poll_interval| Self { poll_interval })
    }
}

/// Start the To Do polling background task
pub async fn start_todo_polling_task(
    store: Arc<dyn Store>,
    todo_sync: MicrosoftTodoSync,
    config: TodoPollerConfig,
) {
    tracing::info!(
        "Starting To Do polling task (interval: {:?})",
        config.poll_interval
    );

    loop {
        match run_poll_cycle(store.as_ref(), &todo_sync).await {
            Ok(report) if report.accounts > 0 => tracing::info!(
                "To Do pass: {} accounts, {} created, {} updated, {} completed",
                report.accounts,
                report.created,
                report.updated,
                report.completed
            ),
            Ok(_) => tracing::debug!("To Do pass: no linked accounts"),
            Err(e) => tracing::error!("To Do poll cycle failed: {}", e),
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

/// One pass for every user. A user whose sync fails is logged and skipped.
pub async fn run_poll_cycle(store: &dyn Store, todo_sync: &MicrosoftTodoSync) -> Result<SyncReport> {
    let users = store
        .users_with_provider(Provider::Azure)
        .await
        .context("Failed to list users with Microsoft accounts")?;

    let mut total = SyncReport::default();
    for user_id in users {
        match todo_sync.sync_user(user_id).await {
            Ok(report) => total.merge(report),
            Err(e) => tracing::error!("To Do sync for {} failed: {}", user_id, e),
        }
    }
    Ok(total)
}
