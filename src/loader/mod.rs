//! Incremental, cancellable loading of package items from many sources.
//!
//! - [`MultiSourceAggregator`] fans one page request out to every source that
//!   still has pages and merges the answers in source order.
//! - [`ItemLoader`] owns the loading state machine and the accumulated items.
//!   It has a single writer; readers take immutable [`LoaderSnapshot`]s.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use package_search_loader::loader::ItemLoader;
//! use package_search_loader::models::Query;
//! use package_search_loader::sources::ScriptedSource;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), package_search_loader::loader::LoadError> {
//! let source = ScriptedSource::new("feed").page_of(&[("Polly", "8.0.0")]);
//! let loader = ItemLoader::new(Query::new("polly"), vec![Arc::new(source)]);
//!
//! let state = loader.load_more(&CancellationToken::new()).await?;
//! println!("{} items, {}", state.items_count, state.status);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod item_loader;
mod state;

pub use aggregator::{MultiSourceAggregator, SearchBatch, SourceCursor, SourceCursors};
pub use item_loader::ItemLoader;
pub use state::{LoaderSnapshot, LoaderState, LoadingStatus};

use crate::sources::SourceFailure;

/// Errors surfaced by the loader and the list controller
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// A required input was missing or malformed
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Name of the offending parameter
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Cancellation was observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Every source attempted by the call failed
    #[error("All sources failed: {}", describe_failures(.0))]
    AllSourcesFailed(Vec<SourceFailure>),

    /// An unexpected defect, such as a panic in a load task
    #[error("Internal fault: {0}")]
    InternalFault(String),
}

impl LoadError {
    /// Shorthand for [`LoadError::InvalidArgument`]
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        LoadError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

fn describe_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceError;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::invalid_argument("first_batch", "required");
        assert_eq!(err.to_string(), "Invalid argument 'first_batch': required");

        let err = LoadError::AllSourcesFailed(vec![
            SourceFailure {
                source_id: "a".to_string(),
                error: SourceError::RateLimit,
            },
            SourceFailure {
                source_id: "b".to_string(),
                error: SourceError::NotFound("feed".to_string()),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "All sources failed: a: Rate limit exceeded; b: Not found: feed"
        );
        assert!(LoadError::Cancelled.is_cancelled());
    }
}
