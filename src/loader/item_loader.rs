//! The item loader: a single-writer state machine over a query's results.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::aggregator::{MultiSourceAggregator, SearchBatch, SourceCursor, SourceCursors};
use super::state::{LoaderSnapshot, LoaderState, LoadingStatus};
use super::LoadError;
use crate::models::{PackageItem, Query};
use crate::sources::{SourceError, SourceRegistry, SourceSearchClient};
use crate::utils::SeenItems;

/// Incrementally loads the results of one query from many sources
///
/// Only one load runs at a time. Callers that ask for more while a load is in
/// flight wait for it and share its result instead of fetching again.
/// Every commit replaces the published [`LoaderSnapshot`] in one step, so
/// readers never see a half-merged page.
#[derive(Debug)]
pub struct ItemLoader {
    query: Query,
    aggregator: MultiSourceAggregator,
    snapshot: watch::Sender<LoaderSnapshot>,
    writer: Mutex<Writer>,
    generation: StdMutex<Generation>,
    completed_loads: AtomicU64,
}

#[derive(Debug)]
struct Generation {
    id: u64,
    cancel: CancellationToken,
}

/// State only the writer path touches
#[derive(Debug, Default)]
struct Writer {
    generation: u64,
    loads: u64,
    status: LoadingStatus,
    cursors: SourceCursors,
    seen: SeenItems,
    items: Vec<PackageItem>,
    errors_by_source: BTreeMap<String, SourceError>,
    last_result: Option<Result<LoaderState, LoadError>>,
}

impl Writer {
    fn for_generation(generation: u64) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    fn state(&self) -> LoaderState {
        LoaderState {
            status: self.status,
            items_count: self.items.len(),
            errors_by_source: self.errors_by_source.clone(),
        }
    }

    fn settle_status(&mut self, exhausted: bool) {
        self.status = match (exhausted, self.items.is_empty()) {
            (true, true) => LoadingStatus::NoItemsFound,
            (true, false) => LoadingStatus::NoMoreItems,
            // Pages are pending; an empty result is not trusted yet
            (false, true) => LoadingStatus::Loading,
            (false, false) => LoadingStatus::Ready,
        };
    }
}

impl ItemLoader {
    /// Create a loader for `query`; `sources` order is merge precedence
    pub fn new(query: Query, sources: Vec<Arc<dyn SourceSearchClient>>) -> Self {
        Self::with_aggregator(query, MultiSourceAggregator::new(sources))
    }

    /// Create a loader over every source of `registry`
    pub fn from_registry(query: Query, registry: &SourceRegistry) -> Self {
        Self::with_aggregator(query, MultiSourceAggregator::from_registry(registry))
    }

    /// Create a loader around an existing aggregator
    pub fn with_aggregator(query: Query, aggregator: MultiSourceAggregator) -> Self {
        let (snapshot, _) = watch::channel(LoaderSnapshot::default());
        Self {
            query,
            aggregator,
            snapshot,
            writer: Mutex::new(Writer::default()),
            generation: StdMutex::new(Generation {
                id: 0,
                cancel: CancellationToken::new(),
            }),
            completed_loads: AtomicU64::new(0),
        }
    }

    /// Query this loader answers
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Whether results are merged from more than one source
    pub fn is_multi_source(&self) -> bool {
        self.aggregator.len() > 1
    }

    /// Latest committed state
    pub fn state(&self) -> LoaderState {
        self.snapshot.borrow().state.clone()
    }

    /// Latest committed snapshot
    pub fn snapshot(&self) -> LoaderSnapshot {
        self.snapshot.borrow().clone()
    }

    /// All items accumulated so far, in merge order.
    ///
    /// Never waits for an in-flight load.
    pub fn get_current_items(&self) -> Arc<Vec<PackageItem>> {
        Arc::clone(&self.snapshot.borrow().items)
    }

    /// Receive every snapshot the loader publishes
    pub fn subscribe(&self) -> watch::Receiver<LoaderSnapshot> {
        self.snapshot.subscribe()
    }

    /// Fetch the first page of every source without changing the loader.
    ///
    /// The returned future owns what it needs, so it can run on another task
    /// before the result is handed to [`apply_first_batch`](Self::apply_first_batch).
    pub fn search_first_page(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<SearchBatch, LoadError>> + Send + 'static {
        let aggregator = self.aggregator.clone();
        let query = self.query.clone();
        async move {
            aggregator
                .fetch(&query, &SourceCursors::new(), &cancel)
                .await
        }
    }

    /// Commit a first page obtained from [`search_first_page`](Self::search_first_page).
    ///
    /// Ignored when the loader already committed a page for the current
    /// query, in which case the current state is returned.
    pub async fn apply_first_batch(
        &self,
        result: Result<SearchBatch, LoadError>,
    ) -> Result<LoaderState, LoadError> {
        if let Ok(batch) = &result {
            if batch.query != self.query {
                return Err(LoadError::invalid_argument(
                    "first_batch",
                    "batch was produced for a different query",
                ));
            }
        }

        let mut writer = self.writer.lock().await;
        let (generation, _) = self.current_generation();
        if writer.generation != generation {
            *writer = Writer::for_generation(generation);
        }
        if writer.loads > 0 || writer.status != LoadingStatus::Unknown {
            tracing::debug!("First batch arrived after loading started; ignoring it");
            return Ok(writer.state());
        }

        self.commit(&mut writer, generation, result)
    }

    /// Load the next page from every source that still has pages.
    ///
    /// Returns immediately once the status is terminal. A caller that waited
    /// for another caller's load receives that load's result.
    pub async fn load_more(&self, cancel: &CancellationToken) -> Result<LoaderState, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        if self.state().status.is_terminal() {
            return Ok(self.state());
        }

        let observed = self.completed_loads.load(Ordering::SeqCst);
        let mut writer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            writer = self.writer.lock() => writer,
        };

        if self.completed_loads.load(Ordering::SeqCst) != observed {
            if let Some(result) = &writer.last_result {
                tracing::trace!("Joining the result of a concurrent load");
                return result.clone();
            }
        }

        let (generation, reset_token) = self.current_generation();
        if writer.generation != generation {
            *writer = Writer::for_generation(generation);
        }
        if writer.status.is_terminal() {
            return Ok(writer.state());
        }

        writer.status = LoadingStatus::Loading;
        self.publish(&writer, generation);

        let fetch_cancel = reset_token.child_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LoadError::Cancelled),
            _ = reset_token.cancelled() => Err(LoadError::Cancelled),
            batch = self.aggregator.fetch(&self.query, &writer.cursors, &fetch_cancel) => batch,
        };
        fetch_cancel.cancel();

        self.commit(&mut writer, generation, result)
    }

    /// Cancel any in-flight load and discard all items and cursors.
    ///
    /// The loader restarts at [`LoadingStatus::Unknown`].
    pub fn reset(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generation.cancel.cancel();
        generation.id += 1;
        generation.cancel = CancellationToken::new();
        self.snapshot.send_replace(LoaderSnapshot::default());
        tracing::debug!(generation = generation.id, "Loader reset");
    }

    fn current_generation(&self) -> (u64, CancellationToken) {
        let generation = self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (generation.id, generation.cancel.clone())
    }

    /// Apply a load result to the writer state and publish it
    fn commit(
        &self,
        writer: &mut Writer,
        generation: u64,
        result: Result<SearchBatch, LoadError>,
    ) -> Result<LoaderState, LoadError> {
        let previous = writer.status;
        let outcome = match result {
            Ok(batch) => {
                for failure in batch.failures {
                    writer
                        .errors_by_source
                        .insert(failure.source_id, failure.error);
                }
                let fresh = writer.seen.filter_new(batch.items);
                writer.items.extend(fresh);
                writer.cursors = batch.cursors;
                writer.settle_status(batch.exhausted);
                Ok(writer.state())
            }
            Err(LoadError::AllSourcesFailed(failures)) => {
                for failure in &failures {
                    writer
                        .errors_by_source
                        .insert(failure.source_id.clone(), failure.error.clone());
                    writer
                        .cursors
                        .set(failure.source_id.clone(), SourceCursor::Exhausted);
                }
                writer.status = LoadingStatus::ErrorOccurred;
                Err(LoadError::AllSourcesFailed(failures))
            }
            Err(LoadError::Cancelled) => {
                writer.status = LoadingStatus::Cancelled;
                Err(LoadError::Cancelled)
            }
            Err(other) => {
                writer.status = LoadingStatus::ErrorOccurred;
                Err(other)
            }
        };

        writer.loads += 1;
        writer.last_result = Some(outcome.clone());
        if self.publish(writer, generation) && previous != writer.status {
            tracing::info!(
                from = %previous,
                to = %writer.status,
                items = writer.items.len(),
                "Loader status changed"
            );
        }
        self.completed_loads.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// Publish the writer state unless a reset started a new generation.
    ///
    /// Returns whether the snapshot was published.
    fn publish(&self, writer: &Writer, generation: u64) -> bool {
        let current = self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.id != generation {
            return false;
        }
        self.snapshot.send_replace(LoaderSnapshot {
            state: writer.state(),
            items: Arc::new(writer.items.clone()),
        });
        true
    }
}
