use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// File name of the active, append-only log.
pub const ACTIVE_FILE: &str = "current-data";

/// File name of the directory lock.
pub const LOCK_FILE: &str = "emberdb.lock";

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".data";
const MERGE_TMP_PREFIX: &str = "merge-tmp-";

pub fn active_path(dir: &Path) -> PathBuf {
    dir.join(ACTIVE_FILE)
}

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{id}{SEGMENT_SUFFIX}"))
}

/// A unique temporary path for a compaction output, time-suffixed so an
/// interrupted run never collides with a later one.
pub fn merge_tmp_path(dir: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.join(format!("{MERGE_TMP_PREFIX}{nanos}{SEGMENT_SUFFIX}"))
}

/// Parses a frozen segment file name of the form `segment-{N}.data`.
/// Leading zeros are rejected so every id has exactly one canonical name.
pub fn parse_segment_id(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

fn is_merge_tmp(name: &str) -> bool {
    name.starts_with(MERGE_TMP_PREFIX) && name.ends_with(SEGMENT_SUFFIX)
}

/// Frozen segment ids present in `dir`, sorted ascending. Subdirectories and
/// file names outside the segment pattern are ignored.
pub fn discover(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = parse_segment_id(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Removes merge-temp files left behind by an interrupted compaction.
pub fn remove_stale_merge_tmp(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_merge_tmp(name) {
                tracing::warn!(file = name, "removing stale merge temp file");
                std::fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}
