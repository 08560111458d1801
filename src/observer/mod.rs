//! Change observer — decides when a page is re-captured.

pub mod driver;
pub mod state;

pub use driver::{
    CaptureTrigger, MutationBatch, MutationFilter, MutationKind, MutationRecord, MutationSource,
    ObserverControl, ObserverHandle, ObserverParts, WatchRoot, locate_watch_root, spawn_observer,
};
pub use state::{ObserverEvent, ObserverState};
