//! Utility modules supporting the search sources and the loader.
//!
//! - [`HttpClient`]: HTTP client with optional rate limiting
//! - [`RetryConfig`] and [`with_retry`]: retry with exponential backoff
//! - [`RetryingSource`]: a source wrapper applying a retry policy
//! - [`SeenItems`]: first-wins deduplication
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use package_search_loader::sources::SourceError;
//! use package_search_loader::utils::{with_retry, RetryConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let cancel = CancellationToken::new();
//! let config = RetryConfig::default().max_attempts(3);
//! let data = with_retry(config, &cancel, fetch_data).await?;
//! # Ok(())
//! # }
//! ```

mod dedup;
mod http;
mod retry;

pub use dedup::SeenItems;
pub use http::HttpClient;
pub use retry::{with_retry, RetryConfig, RetryingSource, TransientError};
