//! Drag-and-drop scheduling: slot math, drop-target classification and the
//! drag session state machine.
//!
//! Times are computed in the viewer's timezone, passed in as a fixed UTC
//! offset, and stored as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Priority, Task, TaskPatch};

/// Rendered height of one hour slot in the calendar grid.
pub const SLOT_HEIGHT_PX: f64 = 120.0;

const MAX_SLOT_MINUTE: f64 = 55.0;
const SNAP_MINUTES: f64 = 5.0;

/// Minute within the hour for a drop `relative_y` pixels below the top of
/// a slot `slot_height` pixels tall: scaled to 60 minutes, clamped to
/// [0, 55] and rounded to the nearest 5.
pub fn slot_minutes(relative_y: f64, slot_height: f64) -> u32 {
    if !relative_y.is_finite() || !slot_height.is_finite() || slot_height <= 0.0 {
        return 0;
    }
    let raw = (relative_y / slot_height * 60.0).clamp(0.0, MAX_SLOT_MINUTE);
    ((raw / SNAP_MINUTES).round() * SNAP_MINUTES) as u32
}

/// Fixed offset for `minutes` east of UTC. Out-of-range values fall back
/// to UTC.
pub fn viewer_offset(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

fn to_utc(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| date.and_time(time).and_utc())
}

/// Pixel positions measured by the UI at drop time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropGeometry {
    /// Top edge of the dragged element.
    pub active_top: f64,
    /// Top edge of the slot container under the pointer.
    pub over_top: f64,
    #[serde(default = "default_slot_height")]
    pub slot_height: f64,
}

fn default_slot_height() -> f64 {
    SLOT_HEIGHT_PX
}

impl DropGeometry {
    pub fn minutes(&self) -> u32 {
        slot_minutes(self.active_top - self.over_top, self.slot_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchZone {
    All,
    Category(Uuid),
    Uncategorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropTarget {
    /// The unscheduled area, optionally one category's column of it.
    Bench { zone: BenchZone },
    /// An hour row of the day or week grid. Hour 0 is the all-day row.
    HourSlot { day: NaiveDate, hour: u32 },
    /// A whole-day cell of the week or month grid.
    Day { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DragError {
    #[error("a task is already being dragged")]
    AlreadyDragging,
    #[error("no task is being dragged")]
    NotDragging,
    #[error("hour {0} is outside the grid")]
    InvalidHour(u32),
}

/// Mutation implied by dropping `task` on `target`, or `None` when the drop
/// would not change anything.
pub fn plan_drop(
    task: &Task,
    target: &DropTarget,
    geometry: Option<&DropGeometry>,
    offset: FixedOffset,
) -> Result<Option<TaskPatch>, DragError> {
    let mut patch = TaskPatch::default();

    match *target {
        DropTarget::Bench { zone } => {
            patch.scheduled_at = Some(None);
            patch.category_id = match zone {
                BenchZone::All => None,
                BenchZone::Category(id) => Some(Some(id)),
                BenchZone::Uncategorized => Some(None),
            };
        }
        DropTarget::HourSlot { day, hour } => {
            if hour > 23 {
                return Err(DragError::InvalidHour(hour));
            }
            let time = if hour == 0 {
                NaiveTime::MIN
            } else {
                let minute = geometry.map(DropGeometry::minutes).unwrap_or(0);
                NaiveTime::from_hms_opt(hour, minute, 0).ok_or(DragError::InvalidHour(hour))?
            };
            patch.scheduled_at = Some(Some(to_utc(offset, day, time)));
        }
        DropTarget::Day { date } => {
            let time = task
                .scheduled_at
                .map(|at| at.with_timezone(&offset).time())
                .unwrap_or(NaiveTime::MIN);
            patch.scheduled_at = Some(Some(to_utc(offset, date, time)));
        }
    }

    if patch.scheduled_at == Some(task.scheduled_at) {
        patch.scheduled_at = None;
    }
    if patch.category_id == Some(task.category_id) {
        patch.category_id = None;
    }

    Ok((!patch.is_empty()).then_some(patch))
}

/// What the drag overlay renders under the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragOverlay {
    pub task_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub priority: Priority,
}

impl From<&Task> for DragOverlay {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            duration_minutes: task.duration_minutes,
            priority: task.priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DragSession {
    #[default]
    Idle,
    Dragging {
        task: Box<Task>,
        overlay: DragOverlay,
    },
    Dropped {
        task_id: Uuid,
        mutation: Option<TaskPatch>,
    },
}

impl DragSession {
    pub fn is_dragging(&self) -> bool {
        matches!(self, DragSession::Dragging { .. })
    }

    pub fn overlay(&self) -> Option<&DragOverlay> {
        match self {
            DragSession::Dragging { overlay, .. } => Some(overlay),
            _ => None,
        }
    }

    /// Picks up a task. A finished drop may be followed directly by a new
    /// lift.
    pub fn lift(&mut self, task: Task) -> Result<(), DragError> {
        if self.is_dragging() {
            return Err(DragError::AlreadyDragging);
        }
        let overlay = DragOverlay::from(&task);
        *self = DragSession::Dragging {
            task: Box::new(task),
            overlay,
        };
        Ok(())
    }

    /// Releases the task. `target` is `None` when the pointer is outside
    /// every drop zone. Returns the mutation to issue, if any.
    pub fn drop_on(
        &mut self,
        target: Option<&DropTarget>,
        geometry: Option<&DropGeometry>,
        offset: FixedOffset,
    ) -> Result<Option<TaskPatch>, DragError> {
        let DragSession::Dragging { task, .. } = self else {
            return Err(DragError::NotDragging);
        };
        let task_id = task.id;
        let mutation = match target {
            Some(target) => plan_drop(task, target, geometry, offset)?,
            None => None,
        };
        *self = DragSession::Dropped {
            task_id,
            mutation: mutation.clone(),
        };
        Ok(mutation)
    }

    pub fn cancel(&mut self) {
        *self = DragSession::Idle;
    }
}
