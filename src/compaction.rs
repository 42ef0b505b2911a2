use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::index::KeyDir;
use crate::layout;
use crate::record::Record;
use crate::recovery;
use crate::scheduler::BackgroundTask;
use crate::segment::Segment;
use crate::state::State;
use crate::store::DbInner;

/// Merges all frozen segments into a single one, keeping only the newest
/// record per key. A no-op with fewer than two frozen segments.
///
/// Runs under the store's exclusive lock. The frozen list is untouched and no
/// input file is deleted until the output has been synced and renamed into
/// place, so a failed merge leaves the pre-merge state; the temp file is
/// removed best-effort.
pub(crate) fn merge(dir: &Path, state: &mut State) -> Result<()> {
    if state.frozen.len() < 2 {
        return Ok(());
    }

    let new_id = state.next_segment_id();
    let tmp_path = layout::merge_tmp_path(dir);
    let written = match write_merged(&tmp_path, &state.frozen) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    let new_path = layout::segment_path(dir, new_id);
    if let Err(e) = fs::rename(&tmp_path, &new_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    // The rename succeeded; the inputs are now superseded on disk.
    let inputs = std::mem::take(&mut state.frozen);
    let input_count = inputs.len();
    for segment in inputs {
        let path = segment.into_path(); // closes the handle first
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to unlink merged input");
        }
    }

    let merged = Segment::open_frozen(new_id, new_path)?;
    let mut index = KeyDir::new();
    recovery::index_segment(&mut index, &merged)?;
    recovery::index_segment(&mut index, &state.active)?;

    tracing::info!(
        inputs = input_count,
        id = new_id,
        records = written,
        "compacted frozen segments"
    );

    state.frozen = vec![merged];
    state.index = index;
    Ok(())
}

/// Writes the newest record per key to `tmp_path`, walking the inputs newest
/// id first. Each segment is buffered into a map while scanning forward so a
/// key's later in-segment occurrence replaces an earlier one before the
/// cross-segment pick. Returns the number of records written.
fn write_merged(tmp_path: &Path, frozen: &[Segment]) -> Result<usize> {
    let file = File::options()
        .create_new(true)
        .write(true)
        .open(tmp_path)?;
    let mut out = BufWriter::new(file);
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut written = 0;

    for segment in frozen.iter().rev() {
        let mut newest: HashMap<Vec<u8>, Record> = HashMap::new();
        for item in segment.scan()? {
            let (_, record) = item?;
            newest.insert(record.key.clone(), record);
        }
        for (key, record) in newest {
            if seen.insert(key) {
                out.write_all(&record.encode())?;
                written += 1;
            }
        }
    }

    let file = out.into_inner().map_err(|e| Error::IO(e.to_string()))?;
    file.sync_all()?;
    Ok(written)
}

/// Periodic background compaction. Failures are logged by the scheduler and
/// retried on the next tick.
pub(crate) struct CompactionTask {
    inner: Arc<DbInner>,
    interval: Duration,
}

impl CompactionTask {
    pub(crate) fn new(inner: Arc<DbInner>, interval: Duration) -> Self {
        Self { inner, interval }
    }
}

impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&self) -> Result<()> {
        self.inner.merge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ENV_LOCK};
    use crate::segment::SegmentId;
    use crate::writer;
    use tempfile::TempDir;

    fn state_with_threshold(dir: &TempDir, threshold: u64) -> State {
        recovery::recover(&Config::new(dir.path()).max_segment_size(threshold))
            .expect("failed to build state")
    }

    fn frozen_files(dir: &TempDir) -> Vec<u64> {
        layout::discover(dir.path()).expect("discover")
    }

    #[test]
    fn test_merge_is_noop_without_two_frozen_segments() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        merge(dir.path(), &mut state).expect("merge on empty store");
        assert!(state.frozen.is_empty());

        writer::put(dir.path(), &mut state, b"k", b"v").expect("put"); // rotates
        assert_eq!(state.frozen.len(), 1);

        merge(dir.path(), &mut state).expect("merge with one frozen segment");
        assert_eq!(state.frozen.len(), 1);
        assert_eq!(frozen_files(&dir), vec![0]);
    }

    #[test]
    fn test_merge_keeps_newest_across_segments() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        writer::put(dir.path(), &mut state, b"k", b"old").expect("put"); // segment-0
        writer::put(dir.path(), &mut state, b"k", b"new").expect("put"); // segment-1
        writer::put(dir.path(), &mut state, b"other", b"x").expect("put"); // segment-2
        assert_eq!(state.frozen.len(), 3);

        merge(dir.path(), &mut state).expect("merge");

        assert_eq!(state.frozen.len(), 1);
        assert_eq!(frozen_files(&dir), vec![3]);

        let pos = state.index.get(b"k").expect("indexed");
        assert_eq!(pos.segment, SegmentId::Frozen(3));
        let record = state.frozen[0].read_record_at(pos.offset).expect("read");
        assert_eq!(record.value, b"new");

        let pos = state.index.get(b"other").expect("indexed");
        let record = state.frozen[0].read_record_at(pos.offset).expect("read");
        assert_eq!(record.value, b"x");
    }

    #[test]
    fn test_merge_keeps_newest_within_one_segment() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        // Two 14-byte records; the threshold trips on the second.
        let mut state = state_with_threshold(&dir, 20);

        writer::put(dir.path(), &mut state, b"dup", b"old").expect("put");
        writer::put(dir.path(), &mut state, b"dup", b"new").expect("put"); // rotates
        assert_eq!(state.frozen.len(), 1);

        writer::put(dir.path(), &mut state, b"pad", &[b'x'; 12]).expect("put"); // rotates
        assert_eq!(state.frozen.len(), 2);

        merge(dir.path(), &mut state).expect("merge");

        let pos = state.index.get(b"dup").expect("indexed");
        let record = state.frozen[0].read_record_at(pos.offset).expect("read");
        assert_eq!(record.value, b"new");
    }

    #[test]
    fn test_merge_drops_superseded_records() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        for _ in 0..4 {
            writer::put(dir.path(), &mut state, b"k", b"vvvv").expect("put");
        }
        let before = state.total_size();

        merge(dir.path(), &mut state).expect("merge");

        // One 13-byte record survives out of four.
        assert_eq!(state.frozen[0].size(), 13);
        assert!(state.total_size() < before);
        assert_eq!(state.index.len(), 1);
    }

    #[test]
    fn test_merge_output_id_is_one_past_newest_input() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        writer::put(dir.path(), &mut state, b"a", b"1").expect("put");
        writer::put(dir.path(), &mut state, b"b", b"2").expect("put");
        merge(dir.path(), &mut state).expect("merge");
        assert_eq!(frozen_files(&dir), vec![2]);

        // Rotation after a merge keeps climbing from the merged id.
        writer::put(dir.path(), &mut state, b"c", b"3").expect("put");
        assert_eq!(frozen_files(&dir), vec![2, 3]);

        merge(dir.path(), &mut state).expect("merge");
        assert_eq!(frozen_files(&dir), vec![4]);
    }

    #[test]
    fn test_merge_leaves_no_temp_files() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        writer::put(dir.path(), &mut state, b"a", b"1").expect("put");
        writer::put(dir.path(), &mut state, b"b", b"2").expect("put");
        merge(dir.path(), &mut state).expect("merge");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("merge-tmp-"))
            .collect();
        assert!(leftovers.is_empty(), "stale temp files: {leftovers:?}");
    }

    #[test]
    fn test_merge_rescans_active_segment() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        writer::put(dir.path(), &mut state, b"frozen", b"1").expect("put");
        writer::put(dir.path(), &mut state, b"frozen2", b"2").expect("put");

        // Live in the active segment, below the threshold.
        state.max_segment_size = 1024;
        writer::put(dir.path(), &mut state, b"live", b"3").expect("put");
        assert_eq!(state.frozen.len(), 2);

        merge(dir.path(), &mut state).expect("merge");

        let pos = state.index.get(b"live").expect("indexed");
        assert_eq!(pos.segment, SegmentId::Active);
        let record = state.active.read_record_at(pos.offset).expect("read");
        assert_eq!(record.value, b"3");
    }
}
