//! Seeding progress store.
//!
//! The only state the seeding loop persists is the index of the next batch to
//! process. [`FileCursorStore`] keeps it as decimal text in one local file;
//! [`MemoryCursorStore`] keeps it in memory for tests and dry runs.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Read/write access to the persisted batch cursor.
pub trait CursorStore: Send + Sync {
    /// The stored cursor, or 0 when none is stored. An unreadable value is
    /// reported and treated as 0.
    fn read(&self) -> u64;

    fn write(&self, cursor: u64) -> Result<()>;

    /// Forgets the stored cursor so the next run starts at batch 0.
    fn clear(&self) -> Result<()>;
}

pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CursorStore for FileCursorStore {
    fn read(&self) -> u64 {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cursor file unreadable, starting at 0");
                return 0;
            }
        };
        match content.trim().parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    content = %content.trim(),
                    "cursor file is not a number, starting at 0"
                );
                0
            }
        }
    }

    fn write(&self, cursor: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, format!("{}\n", cursor))
            .with_context(|| format!("Failed to write cursor file: {}", self.path.display()))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove cursor file: {}", self.path.display())),
        }
    }
}

/// In-memory cursor; records every write.
#[derive(Default)]
pub struct MemoryCursorStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    cursor: Option<u64>,
    writes: Vec<u64>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(cursor: u64) -> Self {
        let store = Self::default();
        if let Ok(mut s) = store.state.lock() {
            s.cursor = Some(cursor);
        }
        store
    }

    /// The stored value, `None` when nothing has been written.
    pub fn current(&self) -> Option<u64> {
        self.state.lock().ok().and_then(|s| s.cursor)
    }

    pub fn writes(&self) -> Vec<u64> {
        self.state
            .lock()
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn read(&self) -> u64 {
        self.current().unwrap_or(0)
    }

    fn write(&self, cursor: u64) -> Result<()> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("cursor store poisoned"))?;
        s.cursor = Some(cursor);
        s.writes.push(cursor);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("cursor store poisoned"))?;
        s.cursor = None;
        Ok(())
    }
}
