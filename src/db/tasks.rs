//! Task CRUD, completion and tree operations.

use super::Database;
use crate::completion;
use crate::error::{PlannerError, PlannerResult};
use crate::time::{end_of_day, local_now, start_of_day};
use crate::types::{
    EffortLevel, NewTask, Task, TaskFilters, TaskId, TaskStatus, TaskTree, TaskType, TaskUpdate,
};
use chrono::{NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Number of descendant levels loaded under each returned task.
pub const DEFAULT_TREE_DEPTH: usize = 3;

/// Longest accepted chore interval, roughly a century.
pub const MAX_INTERVAL_DAYS: i32 = 36_500;

macro_rules! text_enum_sql {
    ($ty:ty, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::from_str(s)
                    .ok_or_else(|| FromSqlError::Other(format!("unknown {}: {}", $what, s).into()))
            }
        }
    };
}

text_enum_sql!(TaskType, "task type");
text_enum_sql!(TaskStatus, "task status");
text_enum_sql!(EffortLevel, "effort level");

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        task_type: row.get("task_type")?,
        status: row.get("status")?,
        scheduled_date: row.get("scheduled_date")?,
        effort: row.get("effort")?,
        parent_id: row.get("parent_id")?,
        deadline: row.get("deadline")?,
        recurrence_interval_days: row.get("recurrence_interval_days")?,
        current_streak: row.get("current_streak")?,
        best_streak: row.get("best_streak")?,
        created_at: row.get("created_at")?,
        last_completed_at: row.get("last_completed_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: TaskId) -> PlannerResult<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    match stmt.query_row(params![task_id], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn task_exists(conn: &Connection, task_id: TaskId) -> PlannerResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

/// Persist every mutable column of `task`.
fn write_task(conn: &Connection, task: &Task) -> PlannerResult<()> {
    conn.execute(
        "UPDATE tasks SET
            title = ?1, description = ?2, status = ?3, scheduled_date = ?4,
            deadline = ?5, effort = ?6, recurrence_interval_days = ?7,
            current_streak = ?8, best_streak = ?9, last_completed_at = ?10, parent_id = ?11
         WHERE id = ?12",
        params![
            task.title,
            task.description,
            task.status,
            task.scheduled_date,
            task.deadline,
            task.effort,
            task.recurrence_interval_days,
            task.current_streak,
            task.best_streak,
            task.last_completed_at,
            task.parent_id,
            task.id,
        ],
    )?;
    Ok(())
}

/// Direct children of any of `parent_ids`, grouped by parent in insertion order.
fn children_by_parent(
    conn: &Connection,
    parent_ids: &[TaskId],
) -> PlannerResult<HashMap<TaskId, Vec<Task>>> {
    let mut grouped: HashMap<TaskId, Vec<Task>> = HashMap::new();
    if parent_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders = vec!["?"; parent_ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM tasks WHERE parent_id IN ({}) ORDER BY id",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(parent_ids.iter()), parse_task_row)?;

    for row in rows {
        let task = row?;
        if let Some(parent_id) = task.parent_id {
            grouped.entry(parent_id).or_default().push(task);
        }
    }
    Ok(grouped)
}

/// Attach up to `depth` levels of descendants to each task.
///
/// Loads one level per query through the `parent_id` index. Anything below
/// `depth` is left out.
fn attach_descendants(
    conn: &Connection,
    tasks: Vec<Task>,
    depth: usize,
) -> PlannerResult<Vec<TaskTree>> {
    let mut levels: Vec<HashMap<TaskId, Vec<Task>>> = Vec::with_capacity(depth);
    let mut frontier: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();

    for _ in 0..depth {
        if frontier.is_empty() {
            break;
        }
        let level = children_by_parent(conn, &frontier)?;
        frontier = level.values().flatten().map(|t| t.id).collect();
        levels.push(level);
    }

    Ok(tasks
        .into_iter()
        .map(|task| build_tree(task, 0, &mut levels))
        .collect())
}

fn build_tree(task: Task, level: usize, levels: &mut [HashMap<TaskId, Vec<Task>>]) -> TaskTree {
    let children = levels
        .get_mut(level)
        .and_then(|m| m.remove(&task.id))
        .unwrap_or_default();

    TaskTree {
        children: children
            .into_iter()
            .map(|child| build_tree(child, level + 1, levels))
            .collect(),
        task,
    }
}

fn load_tree(conn: &Connection, task_id: TaskId, depth: usize) -> PlannerResult<Option<TaskTree>> {
    match get_task_internal(conn, task_id)? {
        None => Ok(None),
        Some(task) => Ok(attach_descendants(conn, vec![task], depth)?.pop()),
    }
}

/// Reload a task that was just written. A missing row here is a store failure.
fn reload_tree(conn: &Connection, task_id: TaskId, depth: usize) -> PlannerResult<TaskTree> {
    load_tree(conn, task_id, depth)?
        .ok_or_else(|| PlannerError::Persistence(format!("Failed to reload task {}", task_id)))
}

fn validate_title(title: &str) -> PlannerResult<()> {
    if title.trim().is_empty() {
        return Err(PlannerError::validation("title", "title must not be empty"));
    }
    Ok(())
}

fn validate_interval(interval: Option<i32>) -> PlannerResult<()> {
    match interval {
        Some(days) if days <= 0 => Err(PlannerError::validation(
            "recurrence_interval_days",
            "recurrence_interval_days must be a positive number of days",
        )),
        Some(days) if days > MAX_INTERVAL_DAYS => Err(PlannerError::validation(
            "recurrence_interval_days",
            format!("recurrence_interval_days must be at most {}", MAX_INTERVAL_DAYS),
        )),
        _ => Ok(()),
    }
}

fn validate_parent_exists(conn: &Connection, parent_id: TaskId) -> PlannerResult<()> {
    if !task_exists(conn, parent_id)? {
        return Err(PlannerError::validation(
            "parent_id",
            format!("Parent task {} does not exist", parent_id),
        ));
    }
    Ok(())
}

/// Append `AND column IN (...)` matching any of `values`. No-op when empty.
fn push_any_of<T: ToSql + Copy + 'static>(
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn ToSql>>,
    param_idx: &mut usize,
    column: &str,
    values: &[T],
) {
    if values.is_empty() {
        return;
    }
    let mut placeholders = Vec::with_capacity(values.len());
    for value in values {
        placeholders.push(format!("?{}", param_idx));
        params_vec.push(Box::new(*value));
        *param_idx += 1;
    }
    sql.push_str(&format!(" AND {} IN ({})", column, placeholders.join(", ")));
}

/// Check whether making `new_parent` the parent of `task_id` would close a loop,
/// i.e. whether `task_id` is `new_parent` or one of its ancestors.
fn would_create_cycle(conn: &Connection, task_id: TaskId, new_parent: TaskId) -> PlannerResult<bool> {
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut current = Some(new_parent);

    while let Some(id) = current {
        if id == task_id {
            return Ok(true);
        }
        if !visited.insert(id) {
            // Pre-existing loop not involving this task.
            return Ok(false);
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<TaskId>>(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
    }

    Ok(false)
}

impl Database {
    /// Create a new task and return it with its (empty) descendant tree.
    ///
    /// Status is always `todo` and `created_at` is the current time.
    pub fn create_task(&self, input: NewTask) -> PlannerResult<TaskTree> {
        self.create_task_at(input, local_now())
    }

    /// Create a task with an explicit creation time.
    pub fn create_task_at(&self, input: NewTask, now: NaiveDateTime) -> PlannerResult<TaskTree> {
        validate_title(&input.title)?;
        validate_interval(input.recurrence_interval_days)?;
        if input.task_type == TaskType::Deadline
            && input.parent_id.is_none()
            && input.deadline.is_none()
        {
            return Err(PlannerError::validation(
                "deadline",
                "Root deadline tasks must have a deadline.",
            ));
        }

        let depth = self.tree_depth();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(parent_id) = input.parent_id {
                validate_parent_exists(&tx, parent_id)?;
            }

            tx.execute(
                "INSERT INTO tasks (
                    title, description, task_type, status, scheduled_date, deadline, effort,
                    recurrence_interval_days, current_streak, best_streak, created_at, parent_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10)",
                params![
                    input.title,
                    input.description,
                    input.task_type,
                    TaskStatus::Todo,
                    input.scheduled_date,
                    input.deadline,
                    input.effort,
                    input.recurrence_interval_days,
                    now,
                    input.parent_id,
                ],
            )?;
            let task_id = tx.last_insert_rowid();

            tx.commit()?;
            info!(task_id, task_type = input.task_type.as_str(), "Task created");

            reload_tree(conn, task_id, depth)
        })
    }

    /// Get a task by ID without descendants.
    pub fn get_task(&self, task_id: TaskId) -> PlannerResult<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task with the configured number of descendant levels.
    pub fn get_task_tree(&self, task_id: TaskId) -> PlannerResult<TaskTree> {
        self.get_task_tree_to_depth(task_id, self.tree_depth())
    }

    /// Get a task with up to `depth` levels of descendants.
    pub fn get_task_tree_to_depth(&self, task_id: TaskId, depth: usize) -> PlannerResult<TaskTree> {
        self.with_conn(|conn| {
            load_tree(conn, task_id, depth)?.ok_or(PlannerError::NotFound(task_id))
        })
    }

    /// Get direct children of a task in insertion order.
    pub fn get_children(&self, parent_id: TaskId) -> PlannerResult<Vec<Task>> {
        self.with_conn(|conn| {
            Ok(children_by_parent(conn, &[parent_id])?
                .remove(&parent_id)
                .unwrap_or_default())
        })
    }

    /// List root tasks matching `filters`, each with its descendants.
    ///
    /// `now` anchors the day-based filters. Ordered by `scheduled_date`
    /// ascending with unscheduled tasks first, then by id.
    pub fn list_root_tasks(
        &self,
        filters: &TaskFilters,
        now: NaiveDateTime,
    ) -> PlannerResult<Vec<TaskTree>> {
        let depth = self.tree_depth();
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks t WHERE t.parent_id IS NULL");
            let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
            let mut param_idx = 1;

            push_any_of(&mut sql, &mut params_vec, &mut param_idx, "t.status", &filters.status);
            push_any_of(
                &mut sql,
                &mut params_vec,
                &mut param_idx,
                "t.task_type",
                &filters.task_type,
            );
            push_any_of(&mut sql, &mut params_vec, &mut param_idx, "t.effort", &filters.effort);

            match filters.has_deadline {
                Some(true) => sql.push_str(" AND t.deadline IS NOT NULL"),
                Some(false) => sql.push_str(" AND t.deadline IS NULL"),
                None => {}
            }

            if filters.only_today {
                sql.push_str(&format!(
                    " AND t.scheduled_date IS NOT NULL AND t.scheduled_date <= ?{}",
                    param_idx
                ));
                params_vec.push(Box::new(end_of_day(now)));
                param_idx += 1;
            }

            if filters.only_overdue {
                sql.push_str(&format!(
                    " AND t.scheduled_date IS NOT NULL AND t.scheduled_date < ?{}",
                    param_idx
                ));
                params_vec.push(Box::new(start_of_day(now)));
                param_idx += 1;
            }

            if let Some(start) = filters.start_date {
                sql.push_str(&format!(" AND t.scheduled_date >= ?{}", param_idx));
                params_vec.push(Box::new(start.and_time(NaiveTime::MIN)));
                param_idx += 1;
            }

            if let Some(end) = filters.end_date {
                sql.push_str(&format!(" AND t.scheduled_date <= ?{}", param_idx));
                params_vec.push(Box::new(end_of_day(end.and_time(NaiveTime::MIN))));
                param_idx += 1;
            }

            // SQLite LIKE folds ASCII case only, so the needle is passed as typed.
            if let Some(ref search) = filters.search {
                let needle = search.trim();
                if !needle.is_empty() {
                    let escaped = needle
                        .replace('\\', "\\\\")
                        .replace('%', "\\%")
                        .replace('_', "\\_");
                    sql.push_str(&format!(
                        " AND (t.title LIKE ?{0} ESCAPE '\\' \
                         OR COALESCE(t.description, '') LIKE ?{0} ESCAPE '\\')",
                        param_idx
                    ));
                    params_vec.push(Box::new(format!("%{}%", escaped)));
                }
            }

            sql.push_str(" ORDER BY t.scheduled_date ASC, t.id ASC");
            debug!(sql = %sql, "Listing root tasks");

            let mut stmt = conn.prepare(&sql)?;
            let roots = stmt
                .query_map(params_from_iter(params_vec.iter()), parse_task_row)?
                .collect::<rusqlite::Result<Vec<Task>>>()?;

            attach_descendants(conn, roots, depth)
        })
    }

    /// Apply the fields present in `update` and return the reloaded tree.
    pub fn update_task(&self, task_id: TaskId, update: &TaskUpdate) -> PlannerResult<TaskTree> {
        if let Some(ref title) = update.title {
            validate_title(title)?;
        }
        if let Some(interval) = update.recurrence_interval_days {
            validate_interval(interval)?;
        }
        for (field, value) in [
            ("current_streak", update.current_streak),
            ("best_streak", update.best_streak),
        ] {
            if matches!(value, Some(n) if n < 0) {
                return Err(PlannerError::validation(
                    field,
                    format!("{} must not be negative", field),
                ));
            }
        }

        let depth = self.tree_depth();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut task =
                get_task_internal(&tx, task_id)?.ok_or(PlannerError::NotFound(task_id))?;

            if let Some(Some(parent_id)) = update.parent_id {
                validate_parent_exists(&tx, parent_id)?;
                if would_create_cycle(&tx, task_id, parent_id)? {
                    return Err(PlannerError::validation(
                        "parent_id",
                        format!(
                            "Task {} cannot be placed under {}: that would create a cycle",
                            task_id, parent_id
                        ),
                    ));
                }
            }

            update.apply_to(&mut task);
            write_task(&tx, &task)?;
            tx.commit()?;
            info!(task_id, "Task updated");

            reload_tree(conn, task_id, depth)
        })
    }

    /// Run the completion rules for `task_id` at `now` and persist the result.
    pub fn mark_task_done(&self, task_id: TaskId, now: NaiveDateTime) -> PlannerResult<TaskTree> {
        let depth = self.tree_depth();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut task =
                get_task_internal(&tx, task_id)?.ok_or(PlannerError::NotFound(task_id))?;
            completion::mark_done(&mut task, now)?;
            write_task(&tx, &task)?;
            tx.commit()?;

            info!(
                task_id,
                task_type = task.task_type.as_str(),
                status = task.status.as_str(),
                current_streak = task.current_streak,
                "Task marked done"
            );

            reload_tree(conn, task_id, depth)
        })
    }

    /// Set a task back to `todo`.
    pub fn mark_task_undone(&self, task_id: TaskId) -> PlannerResult<TaskTree> {
        let depth = self.tree_depth();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut task =
                get_task_internal(&tx, task_id)?.ok_or(PlannerError::NotFound(task_id))?;
            completion::mark_undone(&mut task);
            write_task(&tx, &task)?;
            tx.commit()?;
            info!(task_id, "Task marked undone");

            reload_tree(conn, task_id, depth)
        })
    }

    /// Delete a task and its whole subtree. Returns the number of tasks removed.
    pub fn delete_task(&self, task_id: TaskId) -> PlannerResult<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !task_exists(&tx, task_id)? {
                return Err(PlannerError::NotFound(task_id));
            }

            let removed: i64 = tx.query_row(
                "WITH RECURSIVE subtree(id) AS (
                    SELECT ?1
                    UNION
                    SELECT t.id FROM tasks t JOIN subtree s ON t.parent_id = s.id
                 )
                 SELECT COUNT(*) FROM subtree",
                params![task_id],
                |row| row.get(0),
            )?;

            // Descendants go through ON DELETE CASCADE.
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            tx.commit()?;
            info!(task_id, removed, "Task deleted");

            Ok(removed as usize)
        })
    }

    /// Total number of stored tasks.
    pub fn count_tasks(&self) -> PlannerResult<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?))
    }
}
