//! Process-wide list of open sessions.
//!
//! Every [`Session`](crate::Session) holds a [`Registration`] for its lifetime.
//! Dropping the session closes its socket, so the registry only serves to
//! inspect what is still open, e.g. before process exit.
use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: u64,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static OPEN: Mutex<Vec<SessionSummary>> = Mutex::new(Vec::new());

fn open_list() -> MutexGuard<'static, Vec<SessionSummary>> {
    OPEN.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of the sessions currently open in this process.
pub fn open_sessions() -> Vec<SessionSummary> {
    open_list().clone()
}

/// Scoped registry entry, released on drop.
#[derive(Debug)]
pub struct Registration {
    id: u64,
}

impl Registration {
    pub fn acquire(host: &str, port: u16) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        open_list().push(SessionSummary {
            id,
            host: host.to_string(),
            port,
            database: None,
        });
        debug!("registered session {id} ({host}:{port})");
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_database(&self, database: Option<&str>) {
        if let Some(entry) = open_list().iter_mut().find(|s| s.id == self.id) {
            entry.database = database.map(str::to_string);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        open_list().retain(|s| s.id != self.id);
        debug!("released session {}", self.id);
    }
}
