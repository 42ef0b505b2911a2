use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the rotation threshold. Re-read on every
/// mutation so the threshold can be changed at runtime.
pub const SEG_MAX_ENV: &str = "SEG_MAX";

/// Default rotation threshold: 10 MiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Default background compaction interval.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for an EmberDB store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database
    pub dir: PathBuf,

    /// Rotation threshold in bytes: the active segment is frozen once it
    /// reaches this size. The `SEG_MAX` environment variable overrides it.
    pub max_segment_size: u64,

    /// How often the background compactor runs
    pub compaction_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the rotation threshold in bytes
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set the background compaction interval
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }
}

/// Applies the `SEG_MAX` override to the current threshold. Unset,
/// unparseable or non-positive values leave the current threshold in place.
pub(crate) fn threshold_from_env(current: u64) -> u64 {
    match env::var(SEG_MAX_ENV) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => n as u64,
            _ => current,
        },
        Err(_) => current,
    }
}

/// Serializes tests that read or mutate `SEG_MAX`; the variable is process
/// global and the test harness runs threads in parallel.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
