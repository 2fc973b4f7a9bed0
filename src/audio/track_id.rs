use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Handle the renderer uses to find a registered track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackId(pub u64);

// atomic counter, so ids stay unique across engines and threads
pub fn next_track_id() -> TrackId {
    TrackId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}
