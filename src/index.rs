use std::collections::HashMap;

use crate::segment::SegmentId;

/// Location of a key's newest record: which segment, and the byte offset the
/// record starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub segment: SegmentId,
    pub offset: u64,
}

/// In-memory key directory mapping each key to its newest record position.
///
/// Entries are only ever overwritten (last writer wins) or rebuilt wholesale
/// after compaction; nothing deletes individual keys. Positions are plain
/// `(id, offset)` values, never handles into the segments themselves.
#[derive(Debug, Default)]
pub struct KeyDir {
    map: HashMap<Vec<u8>, Position>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.get(key).copied()
    }

    pub fn insert(&mut self, key: Vec<u8>, pos: Position) {
        self.map.insert(key, pos);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Position)> {
        self.map.iter()
    }

    /// Rotation rewrite: every entry pointing at the active segment now lives
    /// in the newly frozen segment. Offsets are untouched because rotation is
    /// a rename, not a copy.
    pub fn promote_active(&mut self, id: u64) {
        for pos in self.map.values_mut() {
            if pos.segment == SegmentId::Active {
                pos.segment = SegmentId::Frozen(id);
            }
        }
    }
}
