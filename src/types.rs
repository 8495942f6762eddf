//! Core types for the planner.

use crate::time::{
    deserialize_opt_date, deserialize_opt_timestamp, deserialize_patch,
    deserialize_patch_timestamp,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier (SQLite rowid).
pub type TaskId = i64;

/// How a task behaves when it is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// One-shot work with a hard due date.
    Deadline,
    /// Maintenance that comes back some days after it is done.
    Chore,
    /// A habit tracked by consecutive completion days.
    Streak,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Deadline => "deadline",
            TaskType::Chore => "chore",
            TaskType::Streak => "streak",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deadline" => Some(TaskType::Deadline),
            "chore" => Some(TaskType::Chore),
            "streak" => Some(TaskType::Streak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

/// T-shirt sizing. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffortLevel {
    /// Under 15 minutes.
    S,
    /// About an hour.
    M,
    /// Two to three hours of focused work.
    L,
    /// Too big; should be broken down.
    XL,
}

impl EffortLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffortLevel::S => "S",
            EffortLevel::M => "M",
            EffortLevel::L => "L",
            EffortLevel::XL => "XL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "S" => Some(EffortLevel::S),
            "M" => Some(EffortLevel::M),
            "L" => Some(EffortLevel::L),
            "XL" => Some(EffortLevel::XL),
            _ => None,
        }
    }
}

/// A task record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// When the task is next active.
    pub scheduled_date: Option<NaiveDateTime>,
    pub effort: Option<EffortLevel>,
    pub parent_id: Option<TaskId>,
    /// Hard due date (deadline tasks).
    pub deadline: Option<NaiveDateTime>,
    /// Days after completion before a chore comes back.
    pub recurrence_interval_days: Option<i32>,
    pub current_streak: i32,
    pub best_streak: i32,
    pub created_at: NaiveDateTime,
    pub last_completed_at: Option<NaiveDateTime>,
}

/// A task with its loaded descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

impl TaskTree {
    /// Number of tasks in this tree, including the root.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TaskTree::len).sum::<usize>()
    }

    /// Depth of the deepest loaded level below the root.
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.depth())
            .max()
            .unwrap_or(0)
    }
}

/// Input for creating a task.
///
/// Server-owned fields (`id`, `status`, `created_at`, streak counters,
/// `last_completed_at`) are not accepted and are ignored if sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub scheduled_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub effort: Option<EffortLevel>,
    #[serde(default)]
    pub recurrence_interval_days: Option<i32>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            title: title.into(),
            task_type,
            description: None,
            scheduled_date: None,
            deadline: None,
            effort: None,
            recurrence_interval_days: None,
            parent_id: None,
        }
    }
}

/// Partial update. Absent keys leave the stored value untouched; for nullable
/// columns an explicit `null` clears the value.
///
/// `task_type`, `id` and `created_at` are immutable and not part of the patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "deserialize_patch_timestamp")]
    pub scheduled_date: Option<Option<NaiveDateTime>>,
    #[serde(default, deserialize_with = "deserialize_patch_timestamp")]
    pub deadline: Option<Option<NaiveDateTime>>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub effort: Option<Option<EffortLevel>>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub recurrence_interval_days: Option<Option<i32>>,
    #[serde(default)]
    pub current_streak: Option<i32>,
    #[serde(default)]
    pub best_streak: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_patch_timestamp")]
    pub last_completed_at: Option<Option<NaiveDateTime>>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub parent_id: Option<Option<TaskId>>,
}

impl TaskUpdate {
    /// Apply the present fields onto `task`.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(ref title) = self.title {
            task.title = title.clone();
        }
        if let Some(ref description) = self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(scheduled_date) = self.scheduled_date {
            task.scheduled_date = scheduled_date;
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(effort) = self.effort {
            task.effort = effort;
        }
        if let Some(interval) = self.recurrence_interval_days {
            task.recurrence_interval_days = interval;
        }
        if let Some(current) = self.current_streak {
            task.current_streak = current;
        }
        if let Some(best) = self.best_streak {
            task.best_streak = best;
        }
        if let Some(last) = self.last_completed_at {
            task.last_completed_at = last;
        }
        if let Some(parent_id) = self.parent_id {
            task.parent_id = parent_id;
        }
    }
}

/// Filters for listing root tasks.
///
/// List-valued fields match any of their values and are read from repeated
/// query keys (`status=todo&status=done`). Empty lists do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilters {
    #[serde(default)]
    pub status: Vec<TaskStatus>,
    #[serde(default)]
    pub task_type: Vec<TaskType>,
    /// Scheduled for today or earlier. Unscheduled tasks are excluded.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub only_today: bool,
    /// Scheduled strictly before today.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub only_overdue: bool,
    /// Scheduled on or after this day.
    #[serde(default, deserialize_with = "deserialize_opt_date")]
    pub start_date: Option<NaiveDate>,
    /// Scheduled on or before this day.
    #[serde(default, deserialize_with = "deserialize_opt_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub effort: Vec<EffortLevel>,
    #[serde(default, deserialize_with = "deserialize_opt_flag")]
    pub has_deadline: Option<bool>,
    /// Substring of title or description, case-insensitive for ASCII letters.
    #[serde(default)]
    pub search: Option<String>,
}

/// Parse a query-string boolean the way form clients spell them.
pub fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
        _ => None,
    }
}

struct FlagVisitor;

impl<'de> Visitor<'de> for FlagVisitor {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean such as true, false, 1 or 0")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
        match v {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(Unexpected::Unsigned(v), &self)),
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
        match v {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(Unexpected::Signed(v), &self)),
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
        parse_flag(v).ok_or_else(|| E::invalid_value(Unexpected::Str(v), &self))
    }
}

fn deserialize_flag<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(FlagVisitor)
}

fn deserialize_opt_flag<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_flag(d).map(Some)
}
