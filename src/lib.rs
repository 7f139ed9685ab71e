//! # Package Search Loader
//!
//! An incremental, cancellable engine that loads package search results from
//! several package sources and feeds them to a scrolling list as they arrive.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (Query, PackageItem, ResultPage, ContinuationToken)
//! - [`sources`]: Package sources behind the [`SourceSearchClient`] trait
//! - [`loader`]: Multi-source aggregation and the [`ItemLoader`] state machine
//! - [`controller`]: The [`IncrementalListController`] that drives a loader for a list
//! - [`utils`]: HTTP client, retry wrapper and deduplication
//! - [`config`]: Configuration management

pub mod config;
pub mod controller;
pub mod loader;
pub mod models;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use controller::{IncrementalListController, ListObserver, LoadOutcome, LoadRequest};
pub use loader::{ItemLoader, LoadError, LoadingStatus};
pub use models::{PackageItem, Query};
pub use sources::{SourceRegistry, SourceSearchClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
