use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::compaction::{self, CompactionTask};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::layout;
use crate::recovery;
use crate::scheduler::Scheduler;
use crate::state::State;
use crate::writer;

/// An open EmberDB store: an append-only log split into frozen segments plus
/// one active segment, with an in-memory index locating the newest record
/// for every key.
///
/// All operations take `&self`; readers run concurrently while mutations
/// serialize behind an exclusive lock. A background thread compacts frozen
/// segments periodically.
///
/// # Durability
///
/// [`put`](Db::put) does not fsync. A record is durable once the next
/// rotation, a compaction, or [`close`](Db::close) has synced the active
/// segment; callers that need stricter guarantees must add their own flush
/// discipline.
pub struct Db {
    inner: Arc<DbInner>,
    scheduler: Option<Scheduler>,
    _lock: FileLock,
}

/// The part of the store shared with the background compactor.
pub(crate) struct DbInner {
    dir: PathBuf,
    state: RwLock<State>,
}

impl DbInner {
    pub(crate) fn merge(&self) -> Result<()> {
        let mut state = self.state.write()?;
        compaction::merge(&self.dir, &mut state)
    }
}

impl Db {
    /// Opens the store in `dir` with default configuration, creating the
    /// directory as needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Db> {
        Self::open_with_config(Config::new(dir))
    }

    /// Opens the store with custom configuration. Acquires the directory
    /// lock, rebuilds the index by scanning every segment, and starts the
    /// background compactor.
    pub fn open_with_config(config: Config) -> Result<Db> {
        fs::create_dir_all(&config.dir)?;
        let lock = FileLock::acquire(config.dir.join(layout::LOCK_FILE))?;

        let state = recovery::recover(&config)?;
        let inner = Arc::new(DbInner {
            dir: config.dir.clone(),
            state: RwLock::new(state),
        });

        let mut scheduler = Scheduler::new();
        scheduler.register(CompactionTask::new(
            Arc::clone(&inner),
            config.compaction_interval,
        ))?;

        Ok(Db {
            inner,
            scheduler: Some(scheduler),
            _lock: lock,
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.inner.state.write()?;
        writer::put(&self.inner.dir, &mut state, key, value)
    }

    /// Returns the newest value stored under `key`.
    ///
    /// The shared lock is held across the positional read so the record
    /// cannot be unlinked by compaction, or appended over in the active
    /// segment, while it is being read.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let state = self.inner.state.read()?;
        let pos = state.index.get(key).ok_or(Error::NotFound)?;
        let segment = state.resolve(pos.segment)?;
        let record = segment.read_record_at(pos.offset)?;
        Ok(record.value)
    }

    /// Total bytes across the active and all frozen segments.
    pub fn size(&self) -> Result<u64> {
        let state = self.inner.state.read()?;
        Ok(state.total_size())
    }

    /// Merges all frozen segments into one, dropping superseded records.
    /// A no-op unless at least two frozen segments exist.
    pub fn merge(&self) -> Result<()> {
        self.inner.merge()
    }

    /// Shuts the store down: stops the background compactor (waiting out any
    /// in-flight merge), syncs the active segment and drops every file
    /// handle. Returns the first error observed. Consuming the handle means
    /// no operation can run concurrently with shutdown.
    pub fn close(mut self) -> Result<()> {
        let mut first = None;

        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown() {
                first = Some(e);
            }
        }

        match self.inner.state.read() {
            Ok(state) => {
                if let Err(e) = state.active.sync() {
                    first.get_or_insert(e);
                }
            }
            Err(e) => {
                first.get_or_insert(e.into());
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown() {
                tracing::error!(error = %e, "compactor shutdown failed");
            }
        }
    }
}
