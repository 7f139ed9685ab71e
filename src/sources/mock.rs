//! Scripted source for testing purposes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::{ContinuationToken, PackageItem, Query, ResultPage};
use crate::sources::{run_cancellable, SourceError, SourceSearchClient};

#[derive(Debug, Clone)]
enum ScriptedPage {
    Items(Vec<PackageItem>),
    Fail(SourceError),
}

/// A deterministic source that returns predefined pages in order.
///
/// Page `n` is served for the token issued with page `n - 1`; the final
/// scripted page carries no token. A source with no pages answers with one
/// empty final page.
#[derive(Debug)]
pub struct ScriptedSource {
    id: String,
    pages: Vec<ScriptedPage>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    /// Create a new scripted source.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pages: Vec::new(),
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Append a page of items.
    pub fn page(mut self, items: Vec<PackageItem>) -> Self {
        self.pages.push(ScriptedPage::Items(items));
        self
    }

    /// Append a page of `(id, version)` pairs attributed to this source.
    pub fn page_of(self, entries: &[(&str, &str)]) -> Self {
        let items = entries
            .iter()
            .map(|(id, version)| make_item(id, version, &self.id))
            .collect();
        self.page(items)
    }

    /// Append a page that fails with `error`.
    pub fn failing_page(mut self, error: SourceError) -> Self {
        self.pages.push(ScriptedPage::Fail(error));
        self
    }

    /// Delay every fetch by `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold every fetch until a permit is available on `gate`.
    pub fn gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of `fetch_page` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursors received by each call, `None` for a first-page request.
    pub fn received_cursors(&self) -> Vec<Option<String>> {
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn wait_turn(&self) -> Result<(), SourceError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| SourceError::Other("gate closed".to_string()))?;
            permit.forget();
        }
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SourceSearchClient for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_page(
        &self,
        query: &Query,
        token: Option<&ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let token = ContinuationToken::validated(token, query, &self.id);
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(token.map(|t| t.cursor().to_string()));

        let index = match token {
            Some(t) => t
                .cursor()
                .parse::<usize>()
                .map_err(|_| SourceError::InvalidRequest(format!("bad cursor {}", t.cursor())))?,
            None => 0,
        };

        run_cancellable(cancel, self.wait_turn()).await?;

        match self.pages.get(index) {
            None => Ok(ResultPage::last(&self.id, Vec::new())),
            Some(ScriptedPage::Fail(error)) => Err(error.clone()),
            Some(ScriptedPage::Items(items)) => {
                let next = index + 1;
                let next_token = (next < self.pages.len())
                    .then(|| ContinuationToken::new(&self.id, query, next.to_string()));
                Ok(ResultPage::new(&self.id, items.clone(), next_token))
            }
        }
    }
}

/// Helper function to create a package item for testing.
pub fn make_item(id: &str, version: &str, source_id: &str) -> PackageItem {
    PackageItem::new(id, version, source_id)
}
