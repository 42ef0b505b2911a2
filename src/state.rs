use crate::error::{Error, Result};
use crate::index::KeyDir;
use crate::segment::{Segment, SegmentId};

/// All mutable store state, guarded by the facade's single reader-writer
/// lock. The index, the frozen list, the active segment and the current
/// threshold live under one lock so rotation and compaction swap them
/// atomically with respect to readers.
#[derive(Debug)]
pub struct State {
    pub active: Segment,
    /// Frozen segments in ascending id order.
    pub frozen: Vec<Segment>,
    pub index: KeyDir,
    /// Current rotation threshold in bytes.
    pub max_segment_size: u64,
}

impl State {
    /// Resolves an index position's segment reference to an open segment.
    pub fn resolve(&self, id: SegmentId) -> Result<&Segment> {
        match id {
            SegmentId::Active => Ok(&self.active),
            SegmentId::Frozen(n) => self
                .frozen
                .iter()
                .find(|s| s.frozen_id() == Some(n))
                .ok_or(Error::InvalidSegment(n)),
        }
    }

    /// The id the next frozen segment will take: one past the newest, 0 when
    /// no frozen segment exists.
    pub fn next_segment_id(&self) -> u64 {
        self.frozen
            .last()
            .and_then(Segment::frozen_id)
            .map(|id| id + 1)
            .unwrap_or(0)
    }

    /// Total bytes across the active and all frozen segments.
    pub fn total_size(&self) -> u64 {
        self.active.size() + self.frozen.iter().map(Segment::size).sum::<u64>()
    }
}
