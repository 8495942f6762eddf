//! Timely planner library.
//!
//! This module exports the core components for testing and integration.

pub mod api;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod time;
pub mod types;
