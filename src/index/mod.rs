//! Index lifecycle management.
//!
//! The manager owns the published [`IndexView`]: an immutable IVF segment,
//! the delta buffer of recent writes and the tombstones of recent deletes.

mod delta;
mod manager;
mod tombstone;
mod view;

pub use delta::DeltaBuffer;
pub use manager::{
    IndexManager, IndexState, IndexStats, RebuildOutcome, RebuildSummary, RebuildTrigger,
};
pub use tombstone::TombstoneSet;
pub use view::IndexView;
