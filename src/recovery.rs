use crate::config::{self, Config};
use crate::error::Result;
use crate::index::{KeyDir, Position};
use crate::layout;
use crate::segment::Segment;
use crate::state::State;

/// Rebuilds store state from the data directory: frozen segments are scanned
/// in ascending id order, then the active segment, so the newest record for
/// every key wins. A decode error anywhere aborts recovery; the store is
/// corrupt and must not open.
pub(crate) fn recover(config: &Config) -> Result<State> {
    let dir = config.dir.as_path();
    layout::remove_stale_merge_tmp(dir)?;

    let mut frozen = Vec::new();
    for id in layout::discover(dir)? {
        frozen.push(Segment::open_frozen(id, layout::segment_path(dir, id))?);
    }
    let active = Segment::open_active(layout::active_path(dir))?;

    let mut index = KeyDir::new();
    for segment in &frozen {
        index_segment(&mut index, segment)?;
    }
    index_segment(&mut index, &active)?;

    tracing::info!(
        frozen = frozen.len(),
        keys = index.len(),
        active_bytes = active.size(),
        "store recovered"
    );

    Ok(State {
        active,
        frozen,
        index,
        max_segment_size: config::threshold_from_env(config.max_segment_size),
    })
}

/// Scans one segment sequentially, pointing the index at every record seen.
/// Later records overwrite earlier ones.
pub(crate) fn index_segment(index: &mut KeyDir, segment: &Segment) -> Result<()> {
    let id = segment.id();
    for item in segment.scan()? {
        let (offset, record) = item?;
        index.insert(
            record.key,
            Position {
                segment: id,
                offset,
            },
        );
    }
    Ok(())
}
