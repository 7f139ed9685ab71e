//! Package sources with an extensible trait-based architecture.
//!
//! This module defines the [`SourceSearchClient`] trait that every package
//! source implements. A source answers one question: given a query and an
//! optional continuation token, what is the next page of packages?
//!
//! # Available Sources
//!
//! - [`NuGetSearchSource`] - NuGet V3 search service over HTTP
//! - [`LocalFolderSource`] - a directory of `.nupkg` files
//! - [`ScriptedSource`] - deterministic test double with scripted pages
//!
//! Sources are combined by the [`SourceRegistry`], whose order decides
//! which copy of a duplicate package wins when results are merged.
//!
//! # Implementing a New Source
//!
//! 1. Create a struct that implements `SourceSearchClient`
//! 2. Return `ResultPage::last` once there are no further pages
//! 3. Only accept tokens you issued for the same query
//!    (see [`ContinuationToken::validated`])
//! 4. Return `SourceError::Cancelled` when the cancellation token fires;
//!    never return a partial page
//!
//! Sources do not retry. Wrap one in [`RetryingSource`](crate::utils::RetryingSource)
//! to add a retry policy.

mod local;
pub mod mock;
mod nuget;
mod registry;

pub use local::LocalFolderSource;
pub use mock::ScriptedSource;
pub use nuget::{NuGetSearchSource, NUGET_ORG_INDEX};
pub use registry::SourceRegistry;

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::{ContinuationToken, Query, ResultPage};

/// The SourceSearchClient trait is the per-source search capability.
///
/// One instance exists per configured package source.
#[async_trait]
pub trait SourceSearchClient: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this source (e.g. "nuget.org")
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str {
        self.id()
    }

    /// Fetch one page of results.
    ///
    /// `token` is `None` for the first page, otherwise a token this source
    /// returned earlier for the same `query`.
    async fn fetch_page(
        &self,
        query: &Query,
        token: Option<&ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage, SourceError>;
}

/// Errors that can occur when interacting with a source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// API error from the source
    #[error("API error: {0}")]
    Api(String),

    /// Parsing error (JSON, file names, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters or source configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Source or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(String),

    /// The fetch was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl SourceError {
    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

/// A failure recorded against one source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    /// Source that failed
    pub source_id: String,

    /// What went wrong
    pub error: SourceError,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source_id, self.error)
    }
}

/// Run `fut` unless `cancel` fires first.
///
/// Cancellation wins ties so a cancelled fetch never yields a page.
pub async fn run_cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    if cancel.is_cancelled() {
        return Err(SourceError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        result = fut => result,
    }
}
