//! Loader state and the snapshots published to readers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::models::PackageItem;
use crate::sources::SourceError;

/// Status of an [`ItemLoader`](super::ItemLoader)
///
/// ```text
/// Unknown -> Loading -> Ready | NoMoreItems | NoItemsFound | ErrorOccurred | Cancelled
/// Ready   -> Loading           (load more)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadingStatus {
    /// Nothing loaded yet for the current query
    #[default]
    Unknown,
    /// A page is being fetched, or pages are pending with no items so far
    Loading,
    /// At least one item, and more pages are available
    Ready,
    /// Every source is exhausted and at least one item was found
    NoMoreItems,
    /// Every source is exhausted and nothing was found
    NoItemsFound,
    /// Every source attempted by a call failed
    ErrorOccurred,
    /// A load was cancelled
    Cancelled,
}

impl LoadingStatus {
    /// No further loading happens until the loader is reset
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadingStatus::NoMoreItems
                | LoadingStatus::NoItemsFound
                | LoadingStatus::ErrorOccurred
                | LoadingStatus::Cancelled
        )
    }

    /// The loader has not yet settled on a result
    pub fn is_pending(self) -> bool {
        matches!(self, LoadingStatus::Unknown | LoadingStatus::Loading)
    }
}

impl fmt::Display for LoadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LoadingStatus::Unknown => "unknown",
            LoadingStatus::Loading => "loading",
            LoadingStatus::Ready => "ready",
            LoadingStatus::NoMoreItems => "no more items",
            LoadingStatus::NoItemsFound => "no items found",
            LoadingStatus::ErrorOccurred => "error occurred",
            LoadingStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Observable state of a loader
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderState {
    /// Current status
    pub status: LoadingStatus,

    /// Number of accumulated items; never decreases until a reset
    pub items_count: usize,

    /// Last failure of each source that failed during this query
    pub errors_by_source: BTreeMap<String, SourceError>,
}

/// An immutable point-in-time view of a loader
///
/// `state.items_count` always equals `items.len()`.
#[derive(Debug, Clone, Default)]
pub struct LoaderSnapshot {
    /// Loader state at the time of the commit
    pub state: LoaderState,

    /// All accumulated items, in merge order
    pub items: Arc<Vec<PackageItem>>,
}
