use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};

/// A task the scheduler runs periodically on a dedicated thread.
pub trait BackgroundTask: Send + Sync + 'static {
    /// Task name for thread naming and logging
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    /// Execute the task
    fn execute(&self) -> Result<()>;
}

/// Runs background tasks on timer threads with graceful shutdown: one signal
/// stops every task, and [`shutdown`](Scheduler::shutdown) joins them so no
/// task outlives the store that spawned it.
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<Shutdown>,
}

struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    /// Sleeps for one interval, waking early on shutdown. Returns whether
    /// shutdown was requested.
    fn wait(&self, interval: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, interval, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }

    fn trigger(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        self.signal.notify_all();
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: Arc::new(Shutdown {
                stopped: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    /// Registers a periodic task and starts its timer thread. The first run
    /// happens one interval after registration.
    pub fn register<T: BackgroundTask>(&mut self, task: T) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name(format!("emberdb-{}", task.name()))
            .spawn(move || {
                while !shutdown.wait(task.interval()) {
                    if let Err(e) = task.execute() {
                        tracing::error!(task = task.name(), error = %e, "background task failed");
                    }
                }
                tracing::debug!(task = task.name(), "background task stopped");
            })?;
        self.handles.push(handle);
        Ok(())
    }

    /// Signals every task to stop and joins their threads.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.trigger();
        for handle in self.handles.drain(..) {
            handle
                .join()
                .map_err(|_| Error::IO("background task panicked".into()))?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
