//! Fan-out of page requests to many sources, and the deterministic merge.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::LoadError;
use crate::models::{ContinuationToken, PackageItem, Query, ResultPage};
use crate::sources::{SourceFailure, SourceRegistry, SourceSearchClient};
use crate::utils::SeenItems;

/// Paging position of one source
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SourceCursor {
    /// First page not requested yet
    #[default]
    Start,
    /// Resume with this token
    Next(ContinuationToken),
    /// No further pages, or the source failed
    Exhausted,
}

/// Paging positions of every source for one query
///
/// Sources without an entry are at [`SourceCursor::Start`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCursors {
    by_source: HashMap<String, SourceCursor>,
}

impl SourceCursors {
    /// All sources at their first page
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to pass to `source_id`, `None` for a first page
    pub fn token(&self, source_id: &str) -> Option<&ContinuationToken> {
        match self.by_source.get(source_id) {
            Some(SourceCursor::Next(token)) => Some(token),
            _ => None,
        }
    }

    /// Whether `source_id` has no further pages
    pub fn is_exhausted(&self, source_id: &str) -> bool {
        matches!(self.by_source.get(source_id), Some(SourceCursor::Exhausted))
    }

    /// Record the position of `source_id`
    pub fn set(&mut self, source_id: impl Into<String>, cursor: SourceCursor) {
        self.by_source.insert(source_id.into(), cursor);
    }

    fn advance(&mut self, page: &ResultPage) {
        let cursor = match &page.next_token {
            Some(token) => SourceCursor::Next(token.clone()),
            None => SourceCursor::Exhausted,
        };
        self.set(page.source_id.clone(), cursor);
    }
}

/// Merged result of one aggregated page request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBatch {
    /// Query the batch answers
    pub query: Query,

    /// New items, source by source in configuration order, without duplicates
    pub items: Vec<PackageItem>,

    /// Cursors to use for the next request
    pub cursors: SourceCursors,

    /// Sources that failed during this request
    pub failures: Vec<SourceFailure>,

    /// Every source is exhausted after this batch
    pub exhausted: bool,
}

/// Fans a query out to an ordered set of sources and merges their pages
///
/// The aggregator holds no per-query state; the caller owns the
/// [`SourceCursors`] and passes them to every [`fetch`](Self::fetch).
#[derive(Debug, Clone, Default)]
pub struct MultiSourceAggregator {
    sources: Vec<Arc<dyn SourceSearchClient>>,
}

impl MultiSourceAggregator {
    /// Create an aggregator; `sources` order is merge precedence
    pub fn new(sources: Vec<Arc<dyn SourceSearchClient>>) -> Self {
        Self { sources }
    }

    /// Create an aggregator over every source of `registry`
    pub fn from_registry(registry: &SourceRegistry) -> Self {
        Self::new(registry.all().to_vec())
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether there are no sources
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether every source is exhausted under `cursors`
    pub fn is_exhausted(&self, cursors: &SourceCursors) -> bool {
        self.sources.iter().all(|s| cursors.is_exhausted(s.id()))
    }

    /// Fetch the next page from every non-exhausted source.
    ///
    /// All requests run concurrently and are awaited before merging, so the
    /// batch never depends on which source answered first. A failing source is
    /// recorded in [`SearchBatch::failures`] and marked exhausted; the call
    /// only fails when every attempted source failed, or on cancellation.
    pub async fn fetch(
        &self,
        query: &Query,
        cursors: &SourceCursors,
        cancel: &CancellationToken,
    ) -> Result<SearchBatch, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let active: Vec<&Arc<dyn SourceSearchClient>> = self
            .sources
            .iter()
            .filter(|s| !cursors.is_exhausted(s.id()))
            .collect();

        let results = join_all(active.iter().map(|source| async move {
            tracing::debug!(source = source.id(), query = %query.search_text, "Fetching page");
            source
                .fetch_page(query, cursors.token(source.id()), cancel)
                .await
        }))
        .await;

        // A cancelled request must not leave a partial batch behind
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let mut next_cursors = cursors.clone();
        let mut seen = SeenItems::new();
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for (source, result) in active.iter().zip(results) {
            match result {
                Ok(page) => {
                    let page = own_page(page, source.id());
                    next_cursors.advance(&page);
                    items.extend(seen.filter_new(page.items));
                }
                Err(error) => {
                    tracing::warn!(source = source.id(), error = %error, "Source failed");
                    next_cursors.set(source.id(), SourceCursor::Exhausted);
                    failures.push(SourceFailure {
                        source_id: source.id().to_string(),
                        error,
                    });
                }
            }
        }

        if !active.is_empty() && failures.len() == active.len() {
            return Err(LoadError::AllSourcesFailed(failures));
        }

        Ok(SearchBatch {
            query: query.clone(),
            exhausted: self.is_exhausted(&next_cursors),
            items,
            cursors: next_cursors,
            failures,
        })
    }
}

/// Attribute a page and its token to `source_id`.
///
/// A token minted for another source would never be accepted back, so it is
/// treated as the end of this source.
fn own_page(mut page: ResultPage, source_id: &str) -> ResultPage {
    if page.source_id != source_id {
        tracing::debug!(
            source = source_id,
            reported = %page.source_id,
            "Page reported a different source id"
        );
        page.source_id = source_id.to_string();
    }
    if page
        .next_token
        .as_ref()
        .is_some_and(|token| token.source_id() != source_id)
    {
        tracing::warn!(source = source_id, "Dropping continuation token of another source");
        page.next_token = None;
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ScriptedSource, SourceError};

    fn aggregator(sources: Vec<ScriptedSource>) -> MultiSourceAggregator {
        MultiSourceAggregator::new(
            sources
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn SourceSearchClient>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_merge_in_source_order_with_dedup() {
        let agg = aggregator(vec![
            ScriptedSource::new("a").page_of(&[("Serilog", "3.1.1"), ("Polly", "8.0.0")]),
            ScriptedSource::new("b").page_of(&[("polly", "8.0.0"), ("Moq", "4.20.0")]),
        ]);

        let batch = agg
            .fetch(&Query::new("x"), &SourceCursors::new(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = batch.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["Serilog", "Polly", "Moq"]);
        assert_eq!(batch.items[1].source_id, "a");
        assert!(batch.exhausted);
        assert!(batch.failures.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_marks_source_exhausted() {
        let agg = aggregator(vec![
            ScriptedSource::new("bad").failing_page(SourceError::Network("reset".into())),
            ScriptedSource::new("good")
                .page_of(&[("A", "1.0.0")])
                .page_of(&[("B", "1.0.0")]),
        ]);
        let query = Query::new("x");
        let cancel = CancellationToken::new();

        let batch = agg.fetch(&query, &SourceCursors::new(), &cancel).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].source_id, "bad");
        assert!(batch.cursors.is_exhausted("bad"));
        assert!(batch.cursors.token("good").is_some());
        assert!(!batch.exhausted);

        let next = agg.fetch(&query, &batch.cursors, &cancel).await.unwrap();
        assert_eq!(next.items[0].id, "B");
        assert!(next.failures.is_empty());
        assert!(next.exhausted);
    }

    #[tokio::test]
    async fn test_all_sources_failed() {
        let agg = aggregator(vec![
            ScriptedSource::new("a").failing_page(SourceError::RateLimit),
            ScriptedSource::new("b").failing_page(SourceError::Api("boom".into())),
        ]);

        let result = agg
            .fetch(&Query::new("x"), &SourceCursors::new(), &CancellationToken::new())
            .await;
        match result {
            Err(LoadError::AllSourcesFailed(failures)) => {
                let ids: Vec<_> = failures.iter().map(|f| f.source_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_sources_are_skipped() {
        let agg = aggregator(vec![ScriptedSource::new("a").page_of(&[("A", "1.0.0")])]);
        let mut cursors = SourceCursors::new();
        cursors.set("a", SourceCursor::Exhausted);

        let batch = agg
            .fetch(&Query::new("x"), &cursors, &CancellationToken::new())
            .await
            .unwrap();
        assert!(batch.items.is_empty());
        assert!(batch.exhausted);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let agg = aggregator(vec![ScriptedSource::new("a").page_of(&[("A", "1.0.0")])]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agg.fetch(&Query::new("x"), &SourceCursors::new(), &cancel).await;
        assert_eq!(result, Err(LoadError::Cancelled));
    }

    #[test]
    fn test_foreign_token_ends_source() {
        let query = Query::new("x");
        let page = ResultPage::new(
            "a",
            Vec::new(),
            Some(ContinuationToken::new("b", &query, "1")),
        );
        assert!(own_page(page, "a").is_last());
    }
}
