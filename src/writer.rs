use std::fs;
use std::path::Path;

use crate::config;
use crate::error::Result;
use crate::index::Position;
use crate::layout;
use crate::record::Record;
use crate::segment::{Segment, SegmentId};
use crate::state::State;

/// Appends one record to the active segment and points the index at it,
/// rotating afterwards when the active segment has crossed the threshold.
/// Runs under the store's exclusive lock; the index is only updated once the
/// append has succeeded.
pub(crate) fn put(dir: &Path, state: &mut State, key: &[u8], value: &[u8]) -> Result<()> {
    state.max_segment_size = config::threshold_from_env(state.max_segment_size);

    let buf = Record::new(key, value).encode();
    let offset = state.active.append(&buf)?;
    state.index.insert(
        key.to_vec(),
        Position {
            segment: SegmentId::Active,
            offset,
        },
    );

    // A record that crosses the threshold is written in full first; the
    // threshold is only ever evaluated between records.
    if state.active.size() >= state.max_segment_size {
        rotate(dir, state)?;
    }
    Ok(())
}

/// Freezes the active segment under the next frozen id and starts a fresh
/// one. The rename is atomic and the open handle follows the inode, so every
/// index position recorded against the active segment stays valid at the
/// same offset inside the frozen file.
pub(crate) fn rotate(dir: &Path, state: &mut State) -> Result<()> {
    let id = state.next_segment_id();
    let frozen_path = layout::segment_path(dir, id);

    state.active.sync()?;
    fs::rename(state.active.path(), &frozen_path)?;

    let fresh = Segment::open_active(layout::active_path(dir))?;
    let frozen = std::mem::replace(&mut state.active, fresh).into_frozen(id, frozen_path);
    tracing::debug!(id, bytes = frozen.size(), "rotated active segment");

    state.frozen.push(frozen);
    state.index.promote_active(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ENV_LOCK};
    use crate::recovery;
    use crate::segment::SegmentId;
    use tempfile::TempDir;

    fn state_with_threshold(dir: &TempDir, threshold: u64) -> State {
        recovery::recover(&Config::new(dir.path()).max_segment_size(threshold))
            .expect("failed to build state")
    }

    #[test]
    fn test_put_indexes_the_new_record() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 1024);

        put(dir.path(), &mut state, b"k", b"v").expect("put");

        let pos = state.index.get(b"k").expect("indexed");
        assert_eq!(pos.segment, SegmentId::Active);
        assert_eq!(pos.offset, 0);
        assert_eq!(state.active.size(), 10);
        assert!(state.frozen.is_empty());
    }

    #[test]
    fn test_rotation_assigns_sequential_ids() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        // Every 10-byte record reaches the threshold on its own.
        let mut state = state_with_threshold(&dir, 10);

        for key in [b"a", b"b", b"c"] {
            put(dir.path(), &mut state, key, b"v").expect("put");
        }

        let ids: Vec<_> = state.frozen.iter().filter_map(|s| s.frozen_id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(state.next_segment_id(), 3);
        assert_eq!(state.active.size(), 0);
        for id in ids {
            assert!(layout::segment_path(dir.path(), id).exists());
        }
    }

    #[test]
    fn test_threshold_crossing_put_completes_before_rotation() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        // 8 + 3 + 19 bytes, three times the threshold, still one record.
        put(dir.path(), &mut state, b"big", &[b'x'; 19]).expect("put");

        assert_eq!(state.frozen.len(), 1);
        assert_eq!(state.frozen[0].size(), 30);

        let pos = state.index.get(b"big").expect("indexed");
        assert_eq!(pos.segment, SegmentId::Frozen(0));
        let record = state.frozen[0].read_record_at(pos.offset).expect("read");
        assert_eq!(record.value, vec![b'x'; 19]);
    }

    #[test]
    fn test_rotation_preserves_offsets() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 25);

        put(dir.path(), &mut state, b"a", b"1").expect("put"); // offset 0
        put(dir.path(), &mut state, b"b", b"2").expect("put"); // offset 10
        put(dir.path(), &mut state, b"c", b"3").expect("put"); // offset 20, rotates

        for (key, offset, value) in [(b"a", 0, b"1"), (b"b", 10, b"2"), (b"c", 20, b"3")] {
            let pos = state.index.get(key).expect("indexed");
            assert_eq!(pos.segment, SegmentId::Frozen(0));
            assert_eq!(pos.offset, offset);
            let segment = state.resolve(pos.segment).expect("resolve");
            assert_eq!(segment.read_record_at(pos.offset).expect("read").value, value);
        }
    }

    #[test]
    fn test_reads_through_renamed_handle() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut state = state_with_threshold(&dir, 10);

        put(dir.path(), &mut state, b"k", b"v").expect("put");
        assert_eq!(state.frozen.len(), 1);

        // The frozen segment serves reads from the handle opened before the
        // rename.
        let record = state.frozen[0].read_record_at(0).expect("read");
        assert_eq!(record.key, b"k");
        assert_eq!(record.value, b"v");
    }
}
