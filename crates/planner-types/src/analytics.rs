use std::collections::HashMap;

use chrono::{Duration, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::views::local_date;
use crate::{Category, Task};

pub const UNCATEGORIZED: &str = "Uncategorized";
/// Label for tasks pointing at a category that no longer exists.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionBreakdown {
    pub completed: usize,
    pub pending: usize,
    /// Completed share in [0, 1]; 0 when there are no tasks.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category_id: Option<Uuid>,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub completed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub completion: CompletionBreakdown,
    pub by_category: Vec<CategoryCount>,
    pub trend: Vec<TrendPoint>,
}

pub fn completion(tasks: &[Task]) -> CompletionBreakdown {
    let completed = tasks.iter().filter(|task| task.is_completed()).count();
    let pending = tasks.len() - completed;
    let rate = if tasks.is_empty() {
        0.0
    } else {
        completed as f64 / tasks.len() as f64
    };
    CompletionBreakdown {
        completed,
        pending,
        rate,
    }
}

/// Task counts per category, in category sort order. Only categories with
/// at least one task are listed; uncategorized and dangling references get
/// their own buckets at the end.
pub fn by_category(tasks: &[Task], categories: &[Category]) -> Vec<CategoryCount> {
    let mut counts: HashMap<Option<Uuid>, usize> = HashMap::new();
    let mut unknown = 0;
    for task in tasks {
        match task.category_id {
            Some(id) if !categories.iter().any(|c| c.id == id) => unknown += 1,
            key => *counts.entry(key).or_default() += 1,
        }
    }

    let mut ordered: Vec<&Category> = categories.iter().collect();
    ordered.sort_by_key(|category| (category.sort_order, category.name.clone()));

    let mut result: Vec<CategoryCount> = ordered
        .into_iter()
        .filter_map(|category| {
            counts.get(&Some(category.id)).map(|count| CategoryCount {
                category_id: Some(category.id),
                name: category.name.clone(),
                count: *count,
            })
        })
        .collect();

    if let Some(count) = counts.get(&None) {
        result.push(CategoryCount {
            category_id: None,
            name: UNCATEGORIZED.to_string(),
            count: *count,
        });
    }
    if unknown > 0 {
        result.push(CategoryCount {
            category_id: None,
            name: UNKNOWN_CATEGORY.to_string(),
            count: unknown,
        });
    }
    result
}

/// Completed tasks per day for the seven days ending `today`, by the local
/// date of `completed_at`.
pub fn completion_trend(tasks: &[Task], today: NaiveDate, offset: FixedOffset) -> Vec<TrendPoint> {
    (0..7)
        .rev()
        .map(|days_back| {
            let date = today - Duration::days(days_back);
            let completed = tasks
                .iter()
                .filter(|task| task.is_completed())
                .filter(|task| {
                    task.completed_at
                        .is_some_and(|at| local_date(at, offset) == date)
                })
                .count();
            TrendPoint { date, completed }
        })
        .collect()
}

pub fn analytics(
    tasks: &[Task],
    categories: &[Category],
    today: NaiveDate,
    offset: FixedOffset,
) -> AnalyticsResponse {
    AnalyticsResponse {
        completion: completion(tasks),
        by_category: by_category(tasks, categories),
        trend: completion_trend(tasks, today, offset),
    }
}
