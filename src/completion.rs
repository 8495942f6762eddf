//! Completion rules applied when a task is marked done or undone.
//!
//! These functions only mutate the in-memory task. The store runs them inside
//! the same transaction that reads and writes the row.

use crate::error::{PlannerError, PlannerResult};
use crate::types::{Task, TaskStatus, TaskType};
use chrono::{NaiveDateTime, TimeDelta};

/// Whole days between two instants, truncated toward zero.
pub fn day_delta(since: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (now - since).num_days()
}

/// `now` plus a whole number of days, or `None` past the calendar range.
pub fn add_days(now: NaiveDateTime, days: i32) -> Option<NaiveDateTime> {
    TimeDelta::try_days(i64::from(days)).and_then(|delta| now.checked_add_signed(delta))
}

/// Mark a task done at `now`, applying its type's completion rule.
///
/// Fails without touching `task` when a chore's next date cannot be represented.
pub fn mark_done(task: &mut Task, now: NaiveDateTime) -> PlannerResult<()> {
    match task.task_type {
        TaskType::Deadline => {
            task.status = TaskStatus::Done;
            task.last_completed_at = Some(now);
        }
        TaskType::Chore => match task.recurrence_interval_days {
            // The next date counts from completion, not from the old schedule.
            Some(days) if days > 0 => {
                let next = add_days(now, days).ok_or_else(|| {
                    PlannerError::validation(
                        "recurrence_interval_days",
                        format!("next occurrence {} days out is out of range", days),
                    )
                })?;
                task.scheduled_date = Some(next);
                task.last_completed_at = Some(now);
                task.status = TaskStatus::Todo;
            }
            _ => {
                task.last_completed_at = Some(now);
                task.status = TaskStatus::Done;
            }
        },
        TaskType::Streak => {
            task.current_streak = match task.last_completed_at {
                None => 1,
                Some(last) if day_delta(last, now) > 1 => 1,
                Some(_) => task.current_streak.saturating_add(1),
            };
            task.best_streak = task.best_streak.max(task.current_streak);
            task.last_completed_at = Some(now);
            task.status = TaskStatus::Done;
        }
    }
    Ok(())
}

/// Mark a task not done. Streak counters and scheduling are left as they are.
pub fn mark_undone(task: &mut Task) {
    task.status = TaskStatus::Todo;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn task(task_type: TaskType) -> Task {
        Task {
            id: 1,
            title: "t".to_string(),
            description: None,
            task_type,
            status: TaskStatus::Todo,
            scheduled_date: None,
            effort: None,
            parent_id: None,
            deadline: None,
            recurrence_interval_days: None,
            current_streak: 0,
            best_streak: 0,
            created_at: at(2024, 1, 1, 8, 0),
            last_completed_at: None,
        }
    }

    #[test]
    fn deadline_is_done_for_good() {
        let mut t = task(TaskType::Deadline);
        t.deadline = Some(at(2024, 2, 1, 0, 0));
        let now = at(2024, 1, 15, 12, 0);
        mark_done(&mut t, now).unwrap();
        assert_eq!(t.status, TaskStatus::Done);
        assert_eq!(t.last_completed_at, Some(now));
        assert_eq!(t.deadline, Some(at(2024, 2, 1, 0, 0)));
    }

    #[test]
    fn recurring_chore_is_rescheduled_from_completion() {
        let mut t = task(TaskType::Chore);
        t.recurrence_interval_days = Some(3);
        t.scheduled_date = Some(at(2023, 12, 1, 9, 0));
        let now = at(2024, 1, 1, 10, 0);

        mark_done(&mut t, now).unwrap();

        assert_eq!(t.status, TaskStatus::Todo);
        assert_eq!(t.scheduled_date, Some(at(2024, 1, 4, 10, 0)));
        assert_eq!(t.last_completed_at, Some(now));
    }

    #[test]
    fn one_off_chore_stays_done() {
        let mut t = task(TaskType::Chore);
        let scheduled = Some(at(2024, 1, 1, 9, 0));
        t.scheduled_date = scheduled;
        mark_done(&mut t, at(2024, 1, 1, 10, 0)).unwrap();
        assert_eq!(t.status, TaskStatus::Done);
        assert_eq!(t.scheduled_date, scheduled);
    }

    #[test]
    fn zero_interval_chore_is_one_off() {
        let mut t = task(TaskType::Chore);
        t.recurrence_interval_days = Some(0);
        mark_done(&mut t, at(2024, 1, 1, 10, 0)).unwrap();
        assert_eq!(t.status, TaskStatus::Done);
        assert!(t.scheduled_date.is_none());
    }

    #[test]
    fn unrepresentable_next_date_is_rejected() {
        let mut t = task(TaskType::Chore);
        t.recurrence_interval_days = Some(i32::MAX);
        let before = t.clone();

        let err = mark_done(&mut t, at(2024, 1, 1, 10, 0)).unwrap_err();

        assert!(matches!(
            err,
            PlannerError::Validation { ref field, .. } if field == "recurrence_interval_days"
        ));
        assert_eq!(t, before);
    }

    #[test]
    fn add_days_stays_in_range() {
        assert_eq!(add_days(at(2024, 1, 1, 10, 0), 3), Some(at(2024, 1, 4, 10, 0)));
        assert_eq!(add_days(at(2024, 1, 1, 10, 0), 1_000_000_000), None);
    }

    #[test]
    fn first_streak_completion_starts_at_one() {
        let mut t = task(TaskType::Streak);
        t.best_streak = 5;
        mark_done(&mut t, at(2024, 1, 1, 7, 0)).unwrap();
        assert_eq!(t.current_streak, 1);
        assert_eq!(t.best_streak, 5);
        assert_eq!(t.status, TaskStatus::Done);
    }

    #[test]
    fn streak_continues_within_one_day_gap() {
        let mut t = task(TaskType::Streak);
        mark_done(&mut t, at(2024, 1, 1, 7, 0)).unwrap();
        // Same day.
        mark_done(&mut t, at(2024, 1, 1, 21, 0)).unwrap();
        assert_eq!(t.current_streak, 2);
        // 47 hours later truncates to one day.
        mark_done(&mut t, at(2024, 1, 3, 20, 0)).unwrap();
        assert_eq!(t.current_streak, 3);
        assert_eq!(t.best_streak, 3);
    }

    #[test]
    fn streak_breaks_after_more_than_one_day() {
        let mut t = task(TaskType::Streak);
        mark_done(&mut t, at(2024, 1, 1, 7, 0)).unwrap();
        mark_done(&mut t, at(2024, 1, 2, 7, 0)).unwrap();
        mark_done(&mut t, at(2024, 1, 4, 7, 0)).unwrap();
        assert_eq!(t.current_streak, 1);
        assert_eq!(t.best_streak, 2);
    }

    #[test]
    fn best_streak_never_decreases() {
        let mut t = task(TaskType::Streak);
        let days = [1, 2, 3, 10, 11, 30, 31, 32, 33, 60];
        let mut previous_best = 0;
        for d in days {
            let now = at(2024, 1, 1, 8, 0) + Duration::days(d);
            mark_done(&mut t, now).unwrap();
            assert!(t.best_streak >= previous_best);
            assert!(t.best_streak >= t.current_streak);
            previous_best = t.best_streak;
        }
        assert_eq!(t.best_streak, 4);
    }

    #[test]
    fn undone_only_touches_status() {
        for task_type in [TaskType::Deadline, TaskType::Chore, TaskType::Streak] {
            let mut t = task(task_type);
            t.recurrence_interval_days = Some(2);
            mark_done(&mut t, at(2024, 1, 1, 7, 0)).unwrap();
            mark_done(&mut t, at(2024, 1, 2, 7, 0)).unwrap();
            let before = t.clone();

            mark_undone(&mut t);

            assert_eq!(t.status, TaskStatus::Todo);
            assert_eq!(t.current_streak, before.current_streak);
            assert_eq!(t.best_streak, before.best_streak);
            assert_eq!(t.last_completed_at, before.last_completed_at);
            assert_eq!(t.scheduled_date, before.scheduled_date);
        }
    }

    #[test]
    fn day_delta_truncates() {
        assert_eq!(day_delta(at(2024, 1, 1, 23, 0), at(2024, 1, 2, 1, 0)), 0);
        assert_eq!(day_delta(at(2024, 1, 1, 8, 0), at(2024, 1, 3, 7, 59)), 1);
        assert_eq!(day_delta(at(2024, 1, 1, 8, 0), at(2024, 1, 3, 8, 0)), 2);
    }
}
