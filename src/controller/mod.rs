//! The incremental list controller.
//!
//! [`IncrementalListController`] drives an [`ItemLoader`] for a scrolling
//! list: it awaits a precomputed first batch, keeps loading until the loader
//! has really settled on a first result, and republishes items, per-source
//! errors and the final outcome.
//!
//! A load cycle never reports "no items" from an empty snapshot taken before
//! the first page was merged. Zero items are trusted only once the loader
//! status has left `Unknown`/`Loading`.
//!
//! Every cycle ends with exactly one [`ListObserver::load_completed`]
//! notification, whether it succeeded, failed or was cancelled.

mod dispatch;
mod logger;

pub use dispatch::{ChannelDispatcher, DispatchQueue, Dispatcher, InlineDispatcher, Job};
pub use logger::{MessageLevel, TracingLogger, UiLogger};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::loader::{ItemLoader, LoadError, LoaderSnapshot, LoaderState, LoadingStatus, SearchBatch};
use crate::models::PackageItem;
use crate::sources::SourceFailure;

/// Future of the first aggregated page, usually from [`ItemLoader::search_first_page`]
pub type FirstBatch = BoxFuture<'static, Result<SearchBatch, LoadError>>;

/// Final result of a load cycle
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The loader settled; items (possibly none) are available
    Loaded(LoaderState),
    /// The cycle failed; the error was logged
    Failed(LoadError),
    /// The cycle was cancelled
    Cancelled,
}

/// Receives list notifications, through the controller's [`Dispatcher`].
///
/// `cycle` identifies the load cycle a notification belongs to. Item updates
/// of superseded cycles are not delivered.
pub trait ListObserver: Send + Sync {
    /// A load cycle started
    fn loading_started(&self, cycle: u64, message: &str);

    /// The accumulated items changed
    fn items_changed(&self, cycle: u64, items: Arc<Vec<PackageItem>>, state: &LoaderState);

    /// A load cycle (or a load-more request) finished
    fn load_completed(&self, cycle: u64, outcome: &LoadOutcome);
}

/// Validated inputs of one load cycle
pub struct LoadRequest {
    loader: Arc<ItemLoader>,
    loading_message: String,
    logger: Option<Arc<dyn UiLogger>>,
    first_batch: FirstBatch,
    cancel: CancellationToken,
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("query", self.loader.query())
            .field("loading_message", &self.loading_message)
            .field("has_logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

impl LoadRequest {
    /// Start building a request
    pub fn builder() -> LoadRequestBuilder {
        LoadRequestBuilder::default()
    }
}

/// Builder for [`LoadRequest`]; `loader`, `loading_message` and `first_batch` are required
#[derive(Default)]
pub struct LoadRequestBuilder {
    loader: Option<Arc<ItemLoader>>,
    loading_message: Option<String>,
    logger: Option<Arc<dyn UiLogger>>,
    first_batch: Option<FirstBatch>,
    cancel: Option<CancellationToken>,
}

impl LoadRequestBuilder {
    pub fn loader(mut self, loader: Arc<ItemLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn loading_message(mut self, message: impl Into<String>) -> Self {
        self.loading_message = Some(message.into());
        self
    }

    pub fn logger(mut self, logger: Arc<dyn UiLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn first_batch<F>(mut self, first_batch: F) -> Self
    where
        F: Future<Output = Result<SearchBatch, LoadError>> + Send + 'static,
    {
        self.first_batch = Some(Box::pin(first_batch));
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validate the inputs. Nothing asynchronous has started when this fails.
    pub fn build(self) -> Result<LoadRequest, LoadError> {
        let loader = self
            .loader
            .ok_or_else(|| LoadError::invalid_argument("loader", "a loader is required"))?;

        let loading_message = match self.loading_message {
            Some(message) if !message.trim().is_empty() => message,
            Some(_) => {
                return Err(LoadError::invalid_argument(
                    "loading_message",
                    "must not be empty",
                ))
            }
            None => {
                return Err(LoadError::invalid_argument(
                    "loading_message",
                    "a loading message is required",
                ))
            }
        };

        let first_batch = self.first_batch.ok_or_else(|| {
            LoadError::invalid_argument("first_batch", "a first batch future is required")
        })?;

        Ok(LoadRequest {
            loader,
            loading_message,
            logger: self.logger,
            first_batch,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Handle to a running load cycle
#[derive(Debug)]
pub struct LoadHandle {
    cycle: u64,
    cancel: CancellationToken,
    join: JoinHandle<LoadOutcome>,
}

impl LoadHandle {
    /// Cycle number of this load
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Request cancellation of this cycle
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the cycle's outcome
    pub async fn wait(self) -> LoadOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => LoadOutcome::Cancelled,
            Err(err) => LoadOutcome::Failed(LoadError::InternalFault(err.to_string())),
        }
    }
}

#[derive(Default)]
struct ControllerState {
    cycle: u64,
    active: Option<ActiveLoad>,
    items: Arc<Vec<PackageItem>>,
    /// Loader state last republished for the active cycle
    reported: LoaderState,
}

#[derive(Clone)]
struct ActiveLoad {
    cycle: u64,
    loader: Arc<ItemLoader>,
    cancel: CancellationToken,
    logger: Option<Arc<dyn UiLogger>>,
}

/// Drives item loaders for a list surface
pub struct IncrementalListController {
    observer: Arc<dyn ListObserver>,
    dispatcher: Arc<dyn Dispatcher>,
    state: Arc<Mutex<ControllerState>>,
}

impl fmt::Debug for IncrementalListController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalListController")
            .field("cycle", &self.lock().cycle)
            .finish_non_exhaustive()
    }
}

impl IncrementalListController {
    /// Create a controller delivering notifications through `dispatcher`
    pub fn new(observer: Arc<dyn ListObserver>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            observer,
            dispatcher,
            state: Arc::new(Mutex::new(ControllerState::default())),
        }
    }

    /// Create a controller that notifies on the loading task itself
    pub fn inline(observer: Arc<dyn ListObserver>) -> Self {
        Self::new(observer, Arc::new(InlineDispatcher))
    }

    /// Start a load cycle.
    ///
    /// Any previous cycle is cancelled and its loader reset. A request whose
    /// token is already cancelled fails with [`LoadError::Cancelled`] and
    /// raises no notification. Must be called within a Tokio runtime.
    pub fn load_items(&self, request: LoadRequest) -> Result<LoadHandle, LoadError> {
        let LoadRequest {
            loader,
            loading_message,
            logger,
            first_batch,
            cancel,
        } = request;

        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let active = {
            let mut state = self.lock();
            if let Some(previous) = state.active.take() {
                tracing::debug!(cycle = previous.cycle, "Superseding previous load cycle");
                previous.cancel.cancel();
                previous.loader.reset();
            }
            state.cycle += 1;
            state.items = Arc::default();
            state.reported = loader.state();
            let active = ActiveLoad {
                cycle: state.cycle,
                loader,
                cancel: cancel.child_token(),
                logger,
            };
            state.active = Some(active.clone());
            active
        };

        let cycle = active.cycle;
        let handle_cancel = active.cancel.clone();
        let context = self.context(active);

        let join = tokio::spawn(async move {
            let result = AssertUnwindSafe(context.drive(first_batch, loading_message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(LoadError::InternalFault(panic_message(&*panic))));
            context.finish(result)
        });

        Ok(LoadHandle {
            cycle,
            cancel: handle_cancel,
            join,
        })
    }

    /// Load the next page for the active cycle, e.g. when the list was
    /// scrolled to its end.
    ///
    /// Raises one `load_completed` notification for the request. Once the
    /// loader has reached a terminal status the call returns that state and
    /// reports nothing; the cycle already completed with it.
    pub async fn load_more(&self) -> Result<LoaderState, LoadError> {
        let active = self.lock().active.clone().ok_or_else(|| {
            LoadError::invalid_argument("loader", "no load cycle has been started")
        })?;
        let context = self.context(active);
        let loader = &context.active.loader;

        let current = loader.state();
        if current.status.is_terminal() {
            tracing::debug!(status = %current.status, "Nothing more to load");
            return Ok(current);
        }

        let mut updates = loader.subscribe();
        updates.borrow_and_update();

        let result = loader.load_more(&context.active.cancel).await;
        context.forward(&mut updates);
        match &result {
            // Another caller's load settled the loader first and reported it
            Ok(state)
                if matches!(
                    state.status,
                    LoadingStatus::ErrorOccurred | LoadingStatus::Cancelled
                ) => {}
            _ => {
                context.finish(result.clone());
            }
        }
        result
    }

    /// Cancel the active cycle, if any
    pub fn cancel(&self) {
        if let Some(active) = &self.lock().active {
            active.cancel.cancel();
        }
    }

    /// Items last published for the active cycle
    pub fn items(&self) -> Arc<Vec<PackageItem>> {
        Arc::clone(&self.lock().items)
    }

    /// Number of the most recent cycle (0 before the first)
    pub fn current_cycle(&self) -> u64 {
        self.lock().cycle
    }

    /// Loader of the active cycle
    pub fn loader(&self) -> Option<Arc<ItemLoader>> {
        self.lock().active.as_ref().map(|a| Arc::clone(&a.loader))
    }

    fn context(&self, active: ActiveLoad) -> CycleContext {
        CycleContext {
            active,
            observer: Arc::clone(&self.observer),
            dispatcher: Arc::clone(&self.dispatcher),
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Everything a load cycle task needs
struct CycleContext {
    active: ActiveLoad,
    observer: Arc<dyn ListObserver>,
    dispatcher: Arc<dyn Dispatcher>,
    state: Arc<Mutex<ControllerState>>,
}

impl CycleContext {
    async fn drive(
        &self,
        first_batch: FirstBatch,
        loading_message: String,
    ) -> Result<LoaderState, LoadError> {
        let loader = &self.active.loader;
        let cancel = &self.active.cancel;

        let observer = Arc::clone(&self.observer);
        let cycle = self.active.cycle;
        self.dispatcher.dispatch(Box::new(move || {
            observer.loading_started(cycle, &loading_message);
        }));

        let mut updates = loader.subscribe();
        let baseline_count = updates.borrow_and_update().state.items_count;

        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LoadError::Cancelled),
            batch = first_batch => batch,
        };
        // A superseded cycle must not leave its cancellation on a loader the
        // next cycle may reuse
        if cancel.is_cancelled() && !self.is_current() {
            return Err(LoadError::Cancelled);
        }
        let mut result = loader.apply_first_batch(first).await;

        // Keep loading until the loader leaves Unknown/Loading or reports items
        loop {
            self.forward(&mut updates);
            let state = result?;
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            if !state.status.is_pending() || state.items_count != baseline_count {
                return Ok(state);
            }
            tracing::debug!(cycle, status = %state.status, "No settled result yet; loading more");
            result = loader.load_more(cancel).await;
        }
    }

    /// Republish what changed since the controller last reported: new
    /// per-source errors go to the logger, new items go to the observer.
    ///
    /// The baseline lives in the controller state, so the cycle task and
    /// `load_more` never report the same change twice.
    fn forward(&self, updates: &mut watch::Receiver<LoaderSnapshot>) {
        if !updates.has_changed().unwrap_or(false) {
            return;
        }

        let (warnings, changed) = {
            let mut controller = self.lock();
            let snapshot = updates.borrow_and_update().clone();
            if !is_active_cycle(&controller, self.active.cycle) {
                return;
            }

            let warnings: Vec<String> = snapshot
                .state
                .errors_by_source
                .iter()
                .filter(|(source_id, _)| {
                    !controller.reported.errors_by_source.contains_key(*source_id)
                })
                .map(|(source_id, error)| format!("Source '{}' failed: {}", source_id, error))
                .collect();

            let changed = if snapshot.state.items_count != controller.reported.items_count {
                controller.items = Arc::clone(&snapshot.items);
                Some((snapshot.items, snapshot.state.clone()))
            } else {
                None
            };
            controller.reported = snapshot.state;
            (warnings, changed)
        };

        for warning in &warnings {
            self.log(MessageLevel::Warning, warning);
        }

        if let Some((items, state)) = changed {
            let observer = Arc::clone(&self.observer);
            let cycle = self.active.cycle;
            self.dispatcher.dispatch(Box::new(move || {
                observer.items_changed(cycle, items, &state);
            }));
        }
    }

    /// Turn a result into the cycle's single terminal notification
    fn finish(&self, result: Result<LoaderState, LoadError>) -> LoadOutcome {
        let outcome = match result {
            Ok(state) => match state.status {
                LoadingStatus::Cancelled => LoadOutcome::Cancelled,
                LoadingStatus::ErrorOccurred => {
                    LoadOutcome::Failed(LoadError::AllSourcesFailed(failures_of(&state)))
                }
                _ => LoadOutcome::Loaded(state),
            },
            Err(LoadError::Cancelled) => LoadOutcome::Cancelled,
            Err(err) => LoadOutcome::Failed(err),
        };

        match &outcome {
            LoadOutcome::Loaded(state) => tracing::info!(
                cycle = self.active.cycle,
                status = %state.status,
                items = state.items_count,
                "Load completed"
            ),
            LoadOutcome::Failed(err) => self.log(
                MessageLevel::Error,
                &format!(
                    "Loading results for '{}' failed: {}",
                    self.active.loader.query().search_text,
                    err
                ),
            ),
            LoadOutcome::Cancelled => {
                tracing::debug!(cycle = self.active.cycle, "Load cancelled")
            }
        }

        let observer = Arc::clone(&self.observer);
        let cycle = self.active.cycle;
        let notified = outcome.clone();
        self.dispatcher.dispatch(Box::new(move || {
            observer.load_completed(cycle, &notified);
        }));
        outcome
    }

    fn is_current(&self) -> bool {
        is_active_cycle(&self.lock(), self.active.cycle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, level: MessageLevel, message: &str) {
        match &self.active.logger {
            Some(logger) => logger.log(level, message),
            None => TracingLogger.log(level, message),
        }
    }
}

fn is_active_cycle(state: &ControllerState, cycle: u64) -> bool {
    state.active.as_ref().is_some_and(|a| a.cycle == cycle)
}

fn failures_of(state: &LoaderState) -> Vec<SourceFailure> {
    state
        .errors_by_source
        .iter()
        .map(|(source_id, error)| SourceFailure {
            source_id: source_id.clone(),
            error: error.clone(),
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("load task panicked: {}", text)
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("load task panicked: {}", text)
    } else {
        "load task panicked".to_string()
    }
}
