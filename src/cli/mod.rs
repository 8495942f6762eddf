//! CLI command definitions for timely.
//!
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::types::{TaskFilters, TaskId, TaskStatus, TaskType};
use clap::{Parser, Subcommand, ValueEnum};

/// Timely planner API server and CLI tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API server (default if no subcommand given)
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print root tasks and their subtasks
    List(ListArgs),

    /// Print one task and its subtasks
    Show {
        /// Task ID
        id: TaskId,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ListArgs {
    /// Only tasks scheduled for today or earlier
    #[arg(long)]
    pub today: bool,

    /// Filter by status (repeatable)
    #[arg(long, value_enum)]
    pub status: Vec<StatusArg>,

    /// Filter by task type (repeatable)
    #[arg(long = "type", value_enum)]
    pub task_type: Vec<TypeArg>,

    /// Only tasks whose title or description contains this text
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Todo,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    Deadline,
    Chore,
    Streak,
}

impl ListArgs {
    pub fn to_filters(&self) -> TaskFilters {
        TaskFilters {
            status: self
                .status
                .iter()
                .map(|s| match s {
                    StatusArg::Todo => TaskStatus::Todo,
                    StatusArg::Done => TaskStatus::Done,
                })
                .collect(),
            task_type: self
                .task_type
                .iter()
                .map(|t| match t {
                    TypeArg::Deadline => TaskType::Deadline,
                    TypeArg::Chore => TaskType::Chore,
                    TypeArg::Streak => TaskType::Streak,
                })
                .collect(),
            only_today: self.today,
            search: self.search.clone(),
            ..TaskFilters::default()
        }
    }
}
