//! HTTP API for the planner.
//!
//! Exposes the task store over JSON routes under an optional base path.

mod server;

pub use server::{ApiServer, ServerHandle, build_router, start_server};
