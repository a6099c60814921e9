//! Partitioning of a user's tasks into the bench, calendar grids and list
//! groups. Only scheduled tasks ever land in a grid.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{BoardResponse, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardView {
    Day,
    #[default]
    Week,
    Month,
    List,
}

/// One calendar cell: a local date and the tasks scheduled on it, in time
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListGroups {
    pub unscheduled: Vec<Task>,
    pub scheduled: Vec<Task>,
    pub completed: Vec<Task>,
}

pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Tasks with no schedule, highest priority first, then oldest first.
pub fn bench(tasks: &[Task]) -> Vec<Task> {
    let mut bench: Vec<Task> = tasks
        .iter()
        .filter(|task| task.scheduled_at.is_none())
        .cloned()
        .collect();
    bench.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then(a.created_at.cmp(&b.created_at))
    });
    bench
}

/// Buckets scheduled tasks into the given dates (in the viewer's timezone).
/// Dates with no tasks still get an empty bucket.
pub fn grid(tasks: &[Task], dates: &[NaiveDate], offset: FixedOffset) -> Vec<DayBucket> {
    let mut by_date: BTreeMap<NaiveDate, Vec<Task>> =
        dates.iter().map(|date| (*date, Vec::new())).collect();

    for task in tasks {
        let Some(at) = task.scheduled_at else {
            continue;
        };
        if let Some(bucket) = by_date.get_mut(&local_date(at, offset)) {
            bucket.push(task.clone());
        }
    }

    dates
        .iter()
        .map(|date| {
            let mut tasks = by_date.remove(date).unwrap_or_default();
            tasks.sort_by_key(|task| task.scheduled_at);
            DayBucket { date: *date, tasks }
        })
        .collect()
}

/// Monday-to-Sunday week containing `anchor`.
pub fn week_dates(anchor: NaiveDate) -> Vec<NaiveDate> {
    let monday = anchor - Duration::days(anchor.weekday().num_days_from_monday() as i64);
    monday.iter_days().take(7).collect()
}

/// Every date of the month containing `anchor`.
pub fn month_dates(anchor: NaiveDate) -> Vec<NaiveDate> {
    let Some(first) = anchor.with_day(1) else {
        return vec![anchor];
    };
    first
        .iter_days()
        .take_while(|date| date.month() == first.month())
        .collect()
}

pub fn day_view(tasks: &[Task], date: NaiveDate, offset: FixedOffset) -> Vec<DayBucket> {
    grid(tasks, &[date], offset)
}

pub fn week_view(tasks: &[Task], anchor: NaiveDate, offset: FixedOffset) -> Vec<DayBucket> {
    grid(tasks, &week_dates(anchor), offset)
}

pub fn month_view(tasks: &[Task], anchor: NaiveDate, offset: FixedOffset) -> Vec<DayBucket> {
    grid(tasks, &month_dates(anchor), offset)
}

/// Groups for the list view. Completed tasks are listed separately whether
/// or not they were scheduled.
pub fn list_groups(tasks: &[Task]) -> ListGroups {
    let mut groups = ListGroups::default();
    for task in tasks {
        if task.is_completed() {
            groups.completed.push(task.clone());
        } else if task.is_scheduled() {
            groups.scheduled.push(task.clone());
        } else {
            groups.unscheduled.push(task.clone());
        }
    }
    groups.scheduled.sort_by_key(|task| task.scheduled_at);
    groups
        .completed
        .sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    groups
}

/// Scheduled in the past and still open.
pub fn missed(tasks: &[Task], now: DateTime<Utc>) -> Vec<Task> {
    let mut missed: Vec<Task> = tasks
        .iter()
        .filter(|task| !task.is_completed())
        .filter(|task| task.scheduled_at.is_some_and(|at| at < now))
        .cloned()
        .collect();
    missed.sort_by_key(|task| task.scheduled_at);
    missed
}

/// Everything the board page renders for one view.
pub fn board(
    tasks: &[Task],
    view: BoardView,
    anchor: NaiveDate,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> BoardResponse {
    let (days, list) = match view {
        BoardView::Day => (day_view(tasks, anchor, offset), None),
        BoardView::Week => (week_view(tasks, anchor, offset), None),
        BoardView::Month => (month_view(tasks, anchor, offset), None),
        BoardView::List => (Vec::new(), Some(list_groups(tasks))),
    };
    BoardResponse {
        view,
        bench: bench(tasks),
        days,
        list,
        missed: missed(tasks, now),
    }
}
