//! Result pages and continuation tokens.

use serde::{Deserialize, Serialize};

use super::{PackageItem, Query};

/// Opaque cursor returned by a source to resume paging.
///
/// A token is bound to the source and query that produced it. Only the
/// issuing source reads the cursor; everybody else just hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    source_id: String,
    query: Query,
    cursor: String,
}

impl ContinuationToken {
    /// Create a token for `source_id` and `query`
    pub fn new(source_id: impl Into<String>, query: &Query, cursor: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            query: query.clone(),
            cursor: cursor.into(),
        }
    }

    /// Source-private cursor value
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Source that issued this token
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether this token was issued by `source_id` for `query`
    pub fn is_for(&self, query: &Query, source_id: &str) -> bool {
        self.source_id == source_id && &self.query == query
    }

    /// Accept the token only if it belongs to `query` and `source_id`.
    ///
    /// Foreign tokens are dropped and the caller starts from the first page.
    pub fn validated<'a>(
        token: Option<&'a ContinuationToken>,
        query: &Query,
        source_id: &str,
    ) -> Option<&'a ContinuationToken> {
        match token {
            Some(t) if t.is_for(query, source_id) => Some(t),
            Some(_) => {
                tracing::warn!(
                    source = source_id,
                    "Ignoring continuation token issued for another query or source"
                );
                None
            }
            None => None,
        }
    }
}

/// One page of results from a single source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    /// Items in source order
    pub items: Vec<PackageItem>,

    /// Token for the next page; `None` when the source is exhausted
    pub next_token: Option<ContinuationToken>,

    /// Source that produced the page
    pub source_id: String,
}

impl ResultPage {
    /// Create a page
    pub fn new(
        source_id: impl Into<String>,
        items: Vec<PackageItem>,
        next_token: Option<ContinuationToken>,
    ) -> Self {
        Self {
            items,
            next_token,
            source_id: source_id.into(),
        }
    }

    /// Create a final (exhausted) page
    pub fn last(source_id: impl Into<String>, items: Vec<PackageItem>) -> Self {
        Self::new(source_id, items, None)
    }

    /// Whether the source has no further pages
    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }
}
