//! Markdown rendering of task trees for the command line.

use crate::types::{Task, TaskStatus, TaskTree, TaskType};
use chrono::NaiveDateTime;

fn fmt_date(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

/// Type-specific detail shown after the title.
fn task_details(task: &Task) -> Vec<String> {
    let mut details = vec![format!("{}, #{}", task.task_type.as_str(), task.id)];

    match task.task_type {
        TaskType::Deadline => {
            if let Some(deadline) = task.deadline {
                details.push(format!("due {}", fmt_date(deadline)));
            }
        }
        TaskType::Chore => {
            if let Some(days) = task.recurrence_interval_days {
                details.push(format!("every {}d", days));
            }
        }
        TaskType::Streak => {
            details.push(format!(
                "streak {} (best {})",
                task.current_streak, task.best_streak
            ));
        }
    }

    if let Some(scheduled) = task.scheduled_date {
        details.push(format!("next {}", fmt_date(scheduled)));
    }
    if let Some(effort) = task.effort {
        details.push(effort.as_str().to_string());
    }

    details
}

fn push_tree(md: &mut String, tree: &TaskTree, indent: usize) {
    let check = match tree.task.status {
        TaskStatus::Done => "x",
        TaskStatus::Todo => " ",
    };
    md.push_str(&format!(
        "{}- [{}] {} ({})\n",
        "  ".repeat(indent),
        check,
        tree.task.title,
        task_details(&tree.task).join(", ")
    ));
    for child in &tree.children {
        push_tree(md, child, indent + 1);
    }
}

/// Format a task and its loaded descendants as a nested checklist.
pub fn format_tree_markdown(tree: &TaskTree) -> String {
    let mut md = String::new();
    push_tree(&mut md, tree, 0);
    md
}

/// Format several root trees.
pub fn format_forest_markdown(trees: &[TaskTree]) -> String {
    if trees.is_empty() {
        return "_No tasks found._\n".to_string();
    }
    trees.iter().map(format_tree_markdown).collect()
}
