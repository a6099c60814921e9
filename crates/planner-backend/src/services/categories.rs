use std::sync::Arc;

use anyhow::{Context, Result};
use planner_types::{Category, CategoryPatch, ChangeKind, ChangeTable, NewCategoryInput, Origin};
use uuid::Uuid;

use crate::models::NewCategory;
use crate::realtime::ChangeFeed;
use crate::repository::Store;

#[derive(Clone)]
pub struct CategoryService {
    store: Arc<dyn Store>,
    changes: ChangeFeed,
}

impl CategoryService {
    pub fn new(store: Arc<dyn Store>, changes: ChangeFeed) -> Self {
        Self { store, changes }
    }

    /// Categories in display order.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Category>> {
        self.store
            .list_categories(user_id)
            .await
            .context("Failed to list categories")
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Category>> {
        self.store
            .get_category(user_id, id)
            .await
            .context("Failed to load category")
    }

    /// Creates a local category, appended after the last one unless a
    /// position is given.
    pub async fn add(&self, user_id: Uuid, input: NewCategoryInput) -> Option<Category> {
        match self.try_add(user_id, input).await {
            Ok(category) => {
                self.changes
                    .publish(user_id, ChangeTable::Categories, ChangeKind::Insert);
                Some(category)
            }
            Err(e) => {
                tracing::error!("Failed to add category for {}: {:?}", user_id, e);
                None
            }
        }
    }

    async fn try_add(&self, user_id: Uuid, input: NewCategoryInput) -> Result<Category> {
        let sort_order = match input.sort_order {
            Some(order) => order,
            None => self
                .store
                .max_sort_order(user_id)
                .await?
                .map_or(0, |max| max + 1),
        };

        self.store
            .insert_category(NewCategory {
                id: Uuid::new_v4(),
                user_id,
                name: input.name,
                color: input.color,
                sort_order,
                origin: Origin::Local,
                external_id: None,
                external_account: None,
            })
            .await
            .context("Failed to insert category")
    }

    pub async fn update(&self, user_id: Uuid, id: Uuid, patch: CategoryPatch) -> bool {
        match self.store.update_category(user_id, id, &patch).await {
            Ok(Some(_)) => {
                self.changes
                    .publish(user_id, ChangeTable::Categories, ChangeKind::Update);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Failed to update category {}: {:?}", id, e);
                false
            }
        }
    }

    /// Deletes the category. Its tasks stay, uncategorised.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> bool {
        match self.store.delete_category(user_id, id).await {
            Ok(true) => {
                self.changes
                    .publish(user_id, ChangeTable::Categories, ChangeKind::Delete);
                self.changes
                    .publish(user_id, ChangeTable::Tasks, ChangeKind::Update);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!("Failed to delete category {}: {:?}", id, e);
                false
            }
        }
    }
}
