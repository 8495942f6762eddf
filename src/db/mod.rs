//! SQLite-backed task store.

pub mod tasks;

use crate::error::PlannerResult;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
///
/// The single connection behind a mutex serializes every operation, so each
/// mutation transaction is the only writer while it runs.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    tree_depth: usize,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> PlannerResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            tree_depth: tasks::DEFAULT_TREE_DEPTH,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> PlannerResult<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            tree_depth: tasks::DEFAULT_TREE_DEPTH,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Set how many descendant levels are loaded under each returned task.
    pub fn with_tree_depth(mut self, depth: usize) -> Self {
        self.tree_depth = depth;
        self
    }

    pub fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    fn run_migrations(&self) -> PlannerResult<()> {
        let mut conn = self.lock();
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    /// Lock the connection. A panic in an earlier holder does not leave the
    /// connection unusable: any open transaction was rolled back when it dropped.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("Recovering database connection after a panicked holder");
            poisoned.into_inner()
        })
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> PlannerResult<T>
    where
        F: FnOnce(&Connection) -> PlannerResult<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> PlannerResult<T>
    where
        F: FnOnce(&mut Connection) -> PlannerResult<T>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_tasks_table() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tasks'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let enabled: i64 = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn reopening_a_file_keeps_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("planner.db");
        drop(Database::open(&path).unwrap());
        assert!(Database::open(&path).is_ok());
    }

    #[test]
    fn panic_while_holding_connection_does_not_disable_store() {
        let db = Database::open_in_memory().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = db.with_conn_mut(|conn| -> PlannerResult<()> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO tasks (title, task_type, status, created_at)
                     VALUES ('half-written', 'deadline', 'todo', '2024-01-01 00:00:00')",
                    [],
                )?;
                panic!("handler bug");
            });
        }));
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
