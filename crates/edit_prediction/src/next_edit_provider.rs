use crate::{
    CacheLookup, CachedNextEdit, DocumentChange, DocumentId, DocumentState, EditHistory,
    KthNextEdit, NextEditConfig, NextEditError, NoNextEditReason, PredictionBackend,
    PredictionCache, PredictionEvent, PredictionRequest, RejectionCollector, RequestId,
    Subscription, Workspace,
};
use anyhow::{Result, anyhow};
use futures::{
    FutureExt as _, StreamExt as _,
    channel::oneshot,
    future::Shared,
    stream::BoxStream,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol::{Executor, Task, Timer};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    ops::Range,
    path::PathBuf,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use string_edit::{RootedEdit, TextSnapshot};
use util::ResultExt as _;
use uuid::Uuid;

const MAX_RECENT_CHANGES: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextEditTrigger {
    Typing,
    SelectionChange,
    Manual,
}

#[derive(Copy, Clone, Debug)]
pub struct NextEditContext {
    pub trigger: NextEditTrigger,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextEditSource {
    /// Computed by the backend for the document state it is rooted at.
    Fetched,
    Cached,
    /// Computed for an earlier document state and carried forward.
    Rebased,
    RecentlyShown,
}

/// An edit the provider suggests, rooted at the document state it was
/// requested for.
#[derive(Clone, Debug)]
pub struct NextEditResult {
    pub id: Uuid,
    pub request_id: RequestId,
    pub document_id: DocumentId,
    pub edit: RootedEdit,
    pub window: Option<Range<usize>>,
    pub source: NextEditSource,
    /// Position of this edit in the sequence its request streamed.
    pub subsequent_k: usize,
}

#[derive(Clone, Debug)]
pub enum NextEditOutcome {
    Edit { id: Uuid, source: NextEditSource },
    NoEdit(NoNextEditReason),
    Failed(NextEditError),
}

/// Predicts the next edit the user is going to make in a document.
///
/// Calls for the same document state share one backend request. What the
/// backend streams is cached, carried forward as the user keeps editing, and
/// served again without another request whenever it still applies.
pub struct NextEditProvider {
    state: Arc<Mutex<ProviderState>>,
    workspace: Arc<dyn Workspace>,
    backend: Arc<dyn PredictionBackend>,
    executor: Arc<Executor<'static>>,
    _subscription: Subscription,
}

struct ProviderState {
    config: NextEditConfig,
    cache: PredictionCache,
    rejections: RejectionCollector,
    history: EditHistory,
    recently_shown: VecDeque<NextEditResult>,
    recent_changes: HashMap<DocumentId, VecDeque<DocumentChange>>,
    pending_requests: HashMap<DocumentId, Vec<Arc<PendingRequest>>>,
    last_outcome: Option<NextEditOutcome>,
}

#[derive(Clone, Debug)]
enum FirstResult {
    Edit(CachedNextEdit),
    NoEdit(NoNextEditReason),
    Failed(NextEditError),
}

struct PendingRequest {
    id: RequestId,
    document_id: DocumentId,
    snapshot: TextSnapshot,
    cursor: Option<Range<usize>>,
    first_result: Shared<oneshot::Receiver<FirstResult>>,
    first_result_tx: Mutex<Option<oneshot::Sender<FirstResult>>>,
    state: Mutex<RequestState>,
}

#[derive(Default)]
struct RequestState {
    live_dependents: usize,
    // User edits to the document since the request's snapshot.
    changes: Vec<DocumentChange>,
    task: Option<Task<()>>,
    grace_task: Option<Task<()>>,
    backend_call_issued: bool,
    finished: bool,
}

enum Fetch {
    Done(Option<NextEditResult>),
    /// The document changed before a new request could be issued for it.
    Outdated(DocumentState),
}

enum StreamEnd {
    Finished {
        stored: usize,
        window: Option<Range<usize>>,
    },
    Failed {
        stored: usize,
        error: anyhow::Error,
    },
    TimedOut,
    ProviderDropped,
}

impl NextEditProvider {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        backend: Arc<dyn PredictionBackend>,
        config: NextEditConfig,
        executor: Arc<Executor<'static>>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ProviderState::new(config)));
        let subscription = workspace.subscribe(Box::new({
            let state = Arc::downgrade(&state);
            move |change: &DocumentChange| {
                if let Some(state) = state.upgrade() {
                    state.lock().handle_change(change);
                }
            }
        }));
        Self {
            state,
            workspace,
            backend,
            executor,
            _subscription: subscription,
        }
    }

    pub fn config(&self) -> NextEditConfig {
        self.state.lock().config.clone()
    }

    pub fn set_config(&self, config: NextEditConfig) {
        self.state.lock().set_config(config);
    }

    pub fn last_outcome(&self) -> Option<NextEditOutcome> {
        self.state.lock().last_outcome.clone()
    }

    /// Returns the edit the user is most likely to make next in the document,
    /// if any. Dropping the returned future detaches this caller from the
    /// backend request it waits on without necessarily cancelling it.
    pub async fn get_next_edit(
        &self,
        document_id: &DocumentId,
        context: NextEditContext,
    ) -> Result<Option<NextEditResult>> {
        let config = self.config();
        let mut document = self.document(document_id)?;
        log::debug!(
            "next edit requested for {document_id} at version {} ({:?})",
            document.version,
            context.trigger
        );

        let mut awaited = HashSet::new();
        loop {
            if let Some(result) = self.serve_cached(&document, &config).await {
                return Ok(result);
            }
            match self.fetch(&document, &config, &mut awaited).await? {
                Fetch::Done(result) => return Ok(result),
                Fetch::Outdated(current) => {
                    log::debug!(
                        "{document_id} moved from version {} to {} while waiting",
                        document.version,
                        current.version
                    );
                    document = current;
                }
            }
        }
    }

    fn document(&self, document_id: &DocumentId) -> Result<DocumentState> {
        self.workspace.document(document_id).ok_or_else(|| {
            anyhow!(NextEditError::Unexpected(format!(
                "document {document_id} is not open"
            )))
        })
    }

    /// Answers from what was shown or cached before. Returns `None` when the
    /// backend has to be asked.
    async fn serve_cached(
        &self,
        document: &DocumentState,
        config: &NextEditConfig,
    ) -> Option<Option<NextEditResult>> {
        let recently_shown = {
            let state = self.state.lock();
            state
                .recently_shown(document)
                .map(|shown| (state.cache.is_rejected_by_request(shown.request_id), shown))
        };
        match recently_shown {
            Some((true, shown)) => {
                log::debug!("request {} of shown edit was rejected", shown.request_id);
                self.record_no_edit(NoNextEditReason::RejectedByRequest);
                return Some(None);
            }
            Some((false, mut shown)) => {
                delay(config.cache_delay()).await;
                shown.source = NextEditSource::RecentlyShown;
                return Some(self.finish(shown));
            }
            None => {}
        }

        let lookup = self.state.lock().cache.lookup(document);
        match lookup {
            CacheLookup::Hit(cached) if cached.rejected_by_request => {
                log::debug!("request {} of cached edit was rejected", cached.request);
                self.record_no_edit(NoNextEditReason::RejectedByRequest);
                Some(None)
            }
            CacheLookup::Hit(cached) => {
                let (source, cache_delay) = if cached.rebased {
                    (NextEditSource::Rebased, config.rebased_cache_delay())
                } else {
                    (NextEditSource::Cached, config.cache_delay())
                };
                delay(cache_delay).await;
                Some(self.finish(next_edit_result(&document.id, cached, source)))
            }
            CacheLookup::NoEdit { request } => {
                log::debug!("request {request} found nothing to suggest around the cursor");
                self.record_no_edit(NoNextEditReason::NoSuggestions);
                Some(None)
            }
            CacheLookup::Miss => None,
        }
    }

    async fn fetch(
        &self,
        document: &DocumentState,
        config: &NextEditConfig,
        awaited: &mut HashSet<RequestId>,
    ) -> Result<Fetch> {
        let workspace_root = self.workspace.workspace_root(&document.id);
        loop {
            let current = self.workspace.document(&document.id);
            let (request, dependent) = {
                let mut state = self.state.lock();
                let pending = state
                    .pending_requests
                    .get(&document.id)
                    .and_then(|requests| requests.last().cloned())
                    .filter(|request| !awaited.contains(&request.id));
                match pending {
                    Some(request) => {
                        let joins =
                            request.snapshot == document.snapshot || config.reuse_stale_requests;
                        log::debug!(
                            "{} request {} for {}",
                            if joins { "joining" } else { "awaiting" },
                            request.id,
                            document.id
                        );
                        let dependent = joins.then(|| self.add_dependent(&request, config));
                        (request, dependent)
                    }
                    None => {
                        if let Some(current) = current
                            && (current.snapshot != document.snapshot
                                || current.cursor() != document.cursor())
                        {
                            return Ok(Fetch::Outdated(current));
                        }
                        let request =
                            self.start_request(&mut state, document, workspace_root.clone(), config);
                        let dependent = self.add_dependent(&request, config);
                        (request, Some(dependent))
                    }
                }
            };

            awaited.insert(request.id);
            let first_result = request.first_result.clone().await;
            drop(dependent);

            let matches_document = request.snapshot == document.snapshot;
            match first_result {
                Ok(FirstResult::Edit(cached)) if matches_document => {
                    return Ok(Fetch::Done(self.finish(next_edit_result(
                        &document.id,
                        cached,
                        NextEditSource::Fetched,
                    ))));
                }
                Ok(FirstResult::Edit(cached)) => {
                    let changes = request.changes();
                    if let Some((edit, window)) = carry_to(
                        &cached.edit,
                        cached.window.clone(),
                        &changes,
                        &document.snapshot,
                    ) {
                        return Ok(Fetch::Done(self.finish(NextEditResult {
                            id: Uuid::new_v4(),
                            request_id: cached.request,
                            document_id: document.id.clone(),
                            edit,
                            window,
                            source: NextEditSource::Rebased,
                            subsequent_k: cached.k,
                        })));
                    }
                    log::debug!(
                        "edit of request {} does not apply to version {} of {}",
                        request.id,
                        document.version,
                        document.id
                    );
                }
                Ok(FirstResult::NoEdit(reason)) if matches_document => {
                    self.record_no_edit(reason);
                    return Ok(Fetch::Done(None));
                }
                Ok(FirstResult::Failed(error)) if matches_document => {
                    self.state.lock().last_outcome = Some(NextEditOutcome::Failed(error.clone()));
                    return Err(error.into());
                }
                Err(oneshot::Canceled) if matches_document => {
                    self.record_no_edit(NoNextEditReason::GotCancelled);
                    return Ok(Fetch::Done(None));
                }
                Ok(_) | Err(oneshot::Canceled) => {
                    log::debug!("request {} for an older version yielded nothing", request.id);
                }
            }
        }
    }

    fn start_request(
        &self,
        state: &mut ProviderState,
        document: &DocumentState,
        workspace_root: Option<PathBuf>,
        config: &NextEditConfig,
    ) -> Arc<PendingRequest> {
        let id = RequestId::new();
        let (first_result_tx, first_result_rx) = oneshot::channel();
        let request = Arc::new(PendingRequest {
            id,
            document_id: document.id.clone(),
            snapshot: document.snapshot.clone(),
            cursor: document.cursor(),
            first_result: first_result_rx.shared(),
            first_result_tx: Mutex::new(Some(first_result_tx)),
            state: Mutex::default(),
        });

        let prediction_request = PredictionRequest {
            id,
            document: document.clone(),
            workspace_root,
            history: state.history.events().cloned().collect(),
            related_documents: state.history.related_documents(&document.id),
        };
        let task = self.executor.spawn(run_request(
            Arc::downgrade(&self.state),
            request.clone(),
            self.backend.clone(),
            prediction_request,
            config.clone(),
        ));
        request.state.lock().task = Some(task);

        state
            .pending_requests
            .entry(document.id.clone())
            .or_default()
            .push(request.clone());
        log::debug!(
            "started request {id} for {} at version {}",
            document.id,
            document.version
        );
        request
    }

    fn add_dependent(
        &self,
        request: &Arc<PendingRequest>,
        config: &NextEditConfig,
    ) -> DependentGuard {
        DependentGuard::new(
            request.clone(),
            Arc::downgrade(&self.state),
            self.executor.clone(),
            config.cancellation_grace_period(),
        )
    }

    fn finish(&self, result: NextEditResult) -> Option<NextEditResult> {
        let mut state = self.state.lock();
        if state.rejections.is_rejected(
            &result.document_id,
            result.edit.base(),
            result.edit.edit(),
        ) {
            log::debug!("suppressing rejected edit for {}", result.document_id);
            state.last_outcome = Some(NextEditOutcome::NoEdit(NoNextEditReason::Rejected));
            return None;
        }

        log::info!(
            "suggesting {:?} edit {} for {}",
            result.source,
            result.id,
            result.document_id
        );
        state.last_outcome = Some(NextEditOutcome::Edit {
            id: result.id,
            source: result.source,
        });
        Some(result)
    }

    fn record_no_edit(&self, reason: NoNextEditReason) {
        log::debug!("no next edit: {reason}");
        self.state.lock().last_outcome = Some(NextEditOutcome::NoEdit(reason));
    }

    pub fn handle_shown(&self, result: &NextEditResult) {
        log::debug!("edit {} was shown", result.id);
        let mut state = self.state.lock();
        state.recently_shown.retain(|shown| {
            shown.document_id != result.document_id || shown.edit.base() != result.edit.base()
        });
        state.recently_shown.push_back(result.clone());
        let capacity = state.config.recently_shown_capacity;
        while state.recently_shown.len() > capacity {
            state.recently_shown.pop_front();
        }
    }

    pub fn handle_acceptance(&self, result: &NextEditResult) {
        log::info!("edit {} for {} was accepted", result.id, result.document_id);
        self.state
            .lock()
            .recently_shown
            .retain(|shown| shown.id != result.id);
    }

    pub fn handle_rejection(&self, result: &NextEditResult) {
        log::info!("edit {} for {} was rejected", result.id, result.document_id);
        let current = self
            .workspace
            .document(&result.document_id)
            .map(|document| document.snapshot);
        let mut state = self.state.lock();
        state.recently_shown.retain(|shown| shown.id != result.id);
        match current.and_then(|current| state.carry_forward(result, &current)) {
            Some(rejected) => {
                state
                    .rejections
                    .reject(&result.document_id, rejected.base(), rejected.edit());
            }
            None => log::debug!(
                "rejected edit {} no longer applies to {}",
                result.id,
                result.document_id
            ),
        }
        if state.config.cache_tracks_rejections {
            state.cache.reject_by_request(result.request_id);
        }
    }

    pub fn handle_ignored(&self, result: &NextEditResult) {
        log::debug!("edit {} for {} was ignored", result.id, result.document_id);
    }

    pub fn clear_cache(&self) {
        log::debug!("clearing next edit cache");
        let mut state = self.state.lock();
        state.cache.clear();
        state.recently_shown.clear();
    }

    /// Drops everything known about a document and cancels its requests.
    pub fn forget_document(&self, document_id: &DocumentId) {
        let requests = {
            let mut state = self.state.lock();
            state.cache.forget_document(document_id);
            state.rejections.forget_document(document_id);
            state.history.forget_document(document_id);
            state.recent_changes.remove(document_id);
            state
                .recently_shown
                .retain(|shown| &shown.document_id != document_id);
            let requests = state.pending_requests.remove(document_id).unwrap_or_default();
            for request in &requests {
                state.cache.finish_request(request.id);
            }
            requests
        };
        for request in requests {
            request.cancel();
        }
    }
}

impl ProviderState {
    fn new(config: NextEditConfig) -> Self {
        Self {
            cache: PredictionCache::new(
                config.cache_capacity_per_document,
                config.rejection_capacity,
            ),
            rejections: RejectionCollector::new(config.rejection_capacity),
            history: EditHistory::new(&config.history),
            recently_shown: VecDeque::new(),
            recent_changes: HashMap::default(),
            pending_requests: HashMap::default(),
            last_outcome: None,
            config,
        }
    }

    fn set_config(&mut self, config: NextEditConfig) {
        self.cache
            .set_capacities(config.cache_capacity_per_document, config.rejection_capacity);
        self.rejections.set_capacity(config.rejection_capacity);
        self.history.set_config(&config.history);
        while self.recently_shown.len() > config.recently_shown_capacity {
            self.recently_shown.pop_front();
        }
        self.config = config;
    }

    fn handle_change(&mut self, change: &DocumentChange) {
        self.cache.handle_change(change);
        self.rejections.handle_change(change);
        self.history.push(change, Instant::now());
        let changes = self
            .recent_changes
            .entry(change.document_id.clone())
            .or_default();
        if changes.len() >= MAX_RECENT_CHANGES {
            changes.pop_front();
        }
        changes.push_back(change.clone());
        if let Some(requests) = self.pending_requests.get(&change.document_id) {
            for request in requests {
                request.record_change(change);
            }
        }
    }

    fn recently_shown(&self, document: &DocumentState) -> Option<NextEditResult> {
        self.recently_shown
            .iter()
            .rev()
            .find(|shown| shown.document_id == document.id && shown.edit.base() == &document.snapshot)
            .cloned()
    }

    /// Expresses a suggested edit against `current`, following the changes
    /// made to its document since the edit's snapshot.
    fn carry_forward(&self, result: &NextEditResult, current: &TextSnapshot) -> Option<RootedEdit> {
        if result.edit.base() == current {
            return Some(result.edit.clone());
        }
        let changes = self.recent_changes.get(&result.document_id)?;
        let start = changes
            .iter()
            .rposition(|change| &change.old_snapshot == result.edit.base())?;
        carry_to(&result.edit, None, changes.range(start..), current).map(|(edit, _)| edit)
    }

    fn remove_request(&mut self, request: &PendingRequest) {
        self.cache.finish_request(request.id);
        if let Some(requests) = self.pending_requests.get_mut(&request.document_id) {
            requests.retain(|pending| pending.id != request.id);
            if requests.is_empty() {
                self.pending_requests.remove(&request.document_id);
            }
        }
    }
}

impl PendingRequest {
    /// Resolves the first result. Only the first call has an effect.
    fn resolve(&self, result: FirstResult) {
        if let Some(tx) = self.first_result_tx.lock().take() {
            tx.send(result).ok();
        }
    }

    fn record_change(&self, change: &DocumentChange) {
        let mut state = self.state.lock();
        if !state.finished {
            state.changes.push(change.clone());
        }
    }

    fn changes(&self) -> Vec<DocumentChange> {
        self.state.lock().changes.clone()
    }

    /// Stops the backend call and resolves every waiter with cancellation.
    fn cancel(&self) {
        let (task, grace_task) = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            (state.task.take(), state.grace_task.take())
        };
        log::debug!("cancelled request {} for {}", self.id, self.document_id);
        self.first_result_tx.lock().take();
        drop(task);
        if let Some(grace_task) = grace_task {
            grace_task.detach();
        }
    }
}

/// Keeps a request alive while a caller waits on it.
struct DependentGuard {
    request: Arc<PendingRequest>,
    provider: Weak<Mutex<ProviderState>>,
    executor: Arc<Executor<'static>>,
    grace_period: Duration,
}

impl DependentGuard {
    fn new(
        request: Arc<PendingRequest>,
        provider: Weak<Mutex<ProviderState>>,
        executor: Arc<Executor<'static>>,
        grace_period: Duration,
    ) -> Self {
        let grace_task = {
            let mut state = request.state.lock();
            state.live_dependents += 1;
            state.grace_task.take()
        };
        drop(grace_task);
        Self {
            request,
            provider,
            executor,
            grace_period,
        }
    }
}

impl Drop for DependentGuard {
    fn drop(&mut self) {
        let backend_call_issued = {
            let mut state = self.request.state.lock();
            if state.live_dependents == 0 {
                util::debug_panic!("request {} has no live dependents", self.request.id);
                return;
            }
            state.live_dependents -= 1;
            if state.live_dependents > 0 || state.finished {
                return;
            }
            state.backend_call_issued
        };

        if !backend_call_issued {
            cancel_request(&self.provider, &self.request);
            return;
        }

        let request = Arc::downgrade(&self.request);
        let provider = self.provider.clone();
        let grace_period = self.grace_period;
        let grace_task = self.executor.spawn(async move {
            Timer::after(grace_period).await;
            let Some(request) = request.upgrade() else {
                return;
            };
            let abandoned = {
                let state = request.state.lock();
                state.live_dependents == 0 && !state.finished
            };
            if abandoned {
                cancel_request(&provider, &request);
            }
        });
        self.request.state.lock().grace_task = Some(grace_task);
    }
}

fn cancel_request(provider: &Weak<Mutex<ProviderState>>, request: &Arc<PendingRequest>) {
    request.cancel();
    if let Some(provider) = provider.upgrade() {
        provider.lock().remove_request(request);
    }
}

async fn run_request(
    provider: Weak<Mutex<ProviderState>>,
    request: Arc<PendingRequest>,
    backend: Arc<dyn PredictionBackend>,
    prediction_request: PredictionRequest,
    config: NextEditConfig,
) {
    delay(config.debounce()).await;
    request.state.lock().backend_call_issued = true;
    log::debug!("fetching next edits for request {}", request.id);

    let events = backend.fetch(prediction_request);
    let end = smol::future::or(stream_candidates(&provider, &request, events), async {
        Timer::after(config.fetch_timeout()).await;
        StreamEnd::TimedOut
    })
    .await;

    match end {
        StreamEnd::Finished { stored: 0, window } => {
            if let Some(window) = window
                && let Some(provider) = provider.upgrade()
            {
                let mut provider = provider.lock();
                let changes = request.changes();
                provider.cache.set_no_next_edit(
                    &request.document_id,
                    request.snapshot.clone(),
                    window,
                    request.id,
                    &changes,
                );
            }
            request.resolve(FirstResult::NoEdit(NoNextEditReason::NoSuggestions));
        }
        StreamEnd::Finished { stored, .. } => {
            log::debug!("request {} streamed {stored} edit(s)", request.id);
        }
        StreamEnd::Failed { stored: 0, error } => {
            log::error!("request {} failed: {error:#}", request.id);
            request.resolve(FirstResult::Failed(NextEditError::FetchFailure(Arc::new(
                error,
            ))));
        }
        StreamEnd::Failed { stored, error } => {
            log::warn!(
                "request {} failed after streaming {stored} edit(s): {error:#}",
                request.id
            );
        }
        StreamEnd::TimedOut => {
            log::warn!("request {} timed out", request.id);
            request.resolve(FirstResult::NoEdit(NoNextEditReason::Timeout));
        }
        StreamEnd::ProviderDropped => {}
    }
    request.resolve(FirstResult::NoEdit(NoNextEditReason::Uncategorized));

    let task = {
        let mut state = request.state.lock();
        state.finished = true;
        state.task.take()
    };
    if let Some(task) = task {
        task.detach();
    }
    if let Some(provider) = provider.upgrade() {
        provider.lock().remove_request(&request);
    }
}

async fn stream_candidates(
    provider: &Weak<Mutex<ProviderState>>,
    request: &PendingRequest,
    mut events: BoxStream<'static, Result<PredictionEvent>>,
) -> StreamEnd {
    let mut stored = 0;
    let mut scan_window = None;
    while let Some(event) = events.next().await {
        let Some(provider) = provider.upgrade() else {
            return StreamEnd::ProviderDropped;
        };
        match event {
            Ok(PredictionEvent::Edit { edit, window }) => {
                let window = if stored == 0 {
                    scan_window = window.clone();
                    window
                } else {
                    None
                };
                let result = {
                    let mut provider = provider.lock();
                    let changes = request.changes();
                    provider.cache.set_kth_next_edit(
                        &request.document_id,
                        KthNextEdit {
                            request: request.id,
                            k: stored,
                            request_snapshot: request.snapshot.clone(),
                            cursor: request.cursor.clone(),
                            edit,
                            window,
                        },
                        &changes,
                    )
                };
                if let Some(Some(cached)) = result.log_err() {
                    if stored == 0 {
                        request.resolve(FirstResult::Edit(cached));
                    }
                    stored += 1;
                }
            }
            Ok(PredictionEvent::NoSuggestions { window }) => {
                if window.is_some() {
                    scan_window = window;
                }
            }
            Err(error) => return StreamEnd::Failed { stored, error },
        }
    }
    StreamEnd::Finished {
        stored,
        window: scan_window,
    }
}

/// Carries `edit` over `changes` until it is rooted at `target`.
fn carry_to<'a>(
    edit: &RootedEdit,
    mut window: Option<Range<usize>>,
    changes: impl IntoIterator<Item = &'a DocumentChange>,
    target: &TextSnapshot,
) -> Option<(RootedEdit, Option<Range<usize>>)> {
    let mut edit = edit.clone();
    for change in changes {
        if edit.base() == target {
            break;
        }
        if edit.base() != &change.old_snapshot {
            return None;
        }
        edit = edit.interpolate(&change.edit, change.new_snapshot.clone())?;
        window = window.map(|window| change.edit.map_range(window));
    }
    (edit.base() == target && !edit.is_empty()).then_some((edit, window))
}

fn next_edit_result(
    document_id: &DocumentId,
    cached: CachedNextEdit,
    source: NextEditSource,
) -> NextEditResult {
    NextEditResult {
        id: Uuid::new_v4(),
        request_id: cached.request,
        document_id: document_id.clone(),
        edit: cached.edit,
        window: cached.window,
        source,
        subsequent_k: cached.k,
    }
}

async fn delay(duration: Duration) {
    if !duration.is_zero() {
        Timer::after(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeBackend, FakeRequest, LocalWorkspace};
    use futures::{channel::mpsc, future::Future};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use string_edit::StringEdit;

    const TYPING: NextEditContext = NextEditContext {
        trigger: NextEditTrigger::Typing,
    };

    struct TestContext {
        executor: Arc<Executor<'static>>,
        workspace: Arc<LocalWorkspace>,
        backend: Arc<FakeBackend>,
        requests: mpsc::UnboundedReceiver<FakeRequest>,
        provider: NextEditProvider,
        document: DocumentId,
    }

    fn setup(text: &str, cursor: usize, config: NextEditConfig) -> TestContext {
        let executor = Arc::new(Executor::new());
        let workspace = LocalWorkspace::new(Some(PathBuf::from("/project")));
        let document = DocumentId::from("file:///project/src/main.rs");
        workspace.open_document(document.clone(), text, Some("rust"));
        workspace.set_selection(&document, cursor..cursor).unwrap();
        let (backend, requests) = FakeBackend::new();
        let provider =
            NextEditProvider::new(workspace.clone(), backend.clone(), config, executor.clone());
        TestContext {
            executor,
            workspace,
            backend,
            requests,
            provider,
            document,
        }
    }

    fn run<F: Future>(executor: &Executor<'static>, future: F) -> F::Output {
        smol::block_on(executor.run(future))
    }

    fn test_config() -> NextEditConfig {
        NextEditConfig {
            cache_delay_ms: 0,
            rebased_cache_delay_ms: 0,
            cancellation_grace_period_ms: 50,
            ..Default::default()
        }
    }

    fn replace(range: Range<usize>, text: &str) -> PredictionEvent {
        PredictionEvent::Edit {
            edit: StringEdit::replace(range, text),
            window: None,
        }
    }

    #[test]
    fn test_concurrent_calls_share_one_request() {
        let TestContext {
            executor,
            backend,
            mut requests,
            provider,
            document,
            ..
        } = setup("a b c", 2, test_config());

        let (first, second, ()) = run(&executor, async {
            futures::join!(
                provider.get_next_edit(&document, TYPING),
                provider.get_next_edit(&document, TYPING),
                async {
                    let request = requests.next().await.unwrap();
                    assert_eq!(request.request.document.snapshot.text(), "a b c");
                    assert_eq!(
                        request.request.workspace_root,
                        Some(PathBuf::from("/project"))
                    );
                    request.respond(PredictionEvent::Edit {
                        edit: StringEdit::replace(2..3, "B"),
                        window: Some(0..5),
                    });
                    request.finish();
                }
            )
        });
        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();
        assert_eq!(backend.request_count(), 1);
        assert_eq!(first.request_id, second.request_id);
        assert_eq!(first.source, NextEditSource::Fetched);
        assert_eq!(first.edit.apply().text(), "a B c");
        assert_eq!(second.edit.apply().text(), "a B c");

        let cached = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(cached.source, NextEditSource::Cached);
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_streamed_edit_is_rebased_over_user_edits() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("a b c", 2, test_config());

        let (fetched, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                // The user widens the space before `b` while the backend is busy.
                workspace
                    .edit(&document, StringEdit::replace(1..2, "  "))
                    .unwrap();
                request.respond(PredictionEvent::Edit {
                    edit: StringEdit::replace(2..3, "B"),
                    window: Some(0..5),
                });
                request.finish();
            })
        });
        let fetched = fetched.unwrap().unwrap();
        assert_eq!(fetched.source, NextEditSource::Fetched);
        assert_eq!(fetched.edit.apply().text(), "a B c");

        let rebased = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(rebased.source, NextEditSource::Rebased);
        assert_eq!(rebased.edit.edit(), &StringEdit::replace(3..4, "B"));
        assert_eq!(rebased.edit.apply().text(), "a  B c");
        assert_eq!(rebased.window, Some(0..6));
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_diverged_request_is_awaited_and_rebased() {
        let text = indoc! {"
            let x = 1;
            let y = 2;
        "};
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup(text, 19, test_config());

        let (first, second) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                workspace.edit(&document, StringEdit::insert(0, "// ")).unwrap();
                let (second, ()) = futures::join!(
                    provider.get_next_edit(&document, TYPING),
                    async move {
                        request.respond(replace(19..20, "3"));
                        request.finish();
                    }
                );
                second
            })
        });

        let first = first.unwrap().unwrap();
        assert_eq!(first.source, NextEditSource::Fetched);
        assert_eq!(first.edit.apply().text(), "let x = 1;\nlet y = 3;\n");
        let second = second.unwrap().unwrap();
        assert_eq!(second.source, NextEditSource::Rebased);
        assert_eq!(second.request_id, first.request_id);
        assert_eq!(second.edit.apply().text(), "// let x = 1;\nlet y = 3;\n");
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_retry_request_uses_current_document() {
        let text = indoc! {"
            let x = 1;
            let y = 2;
        "};
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup(text, 19, test_config());

        let (first, (second, ())) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let first_request = requests.next().await.unwrap();
                workspace
                    .edit(&document, StringEdit::replace(19..20, "5"))
                    .unwrap();
                futures::join!(provider.get_next_edit(&document, TYPING), async {
                    workspace.edit(&document, StringEdit::insert(0, "// ")).unwrap();
                    // Conflicts with what the user typed since.
                    first_request.respond(replace(19..20, "3"));
                    first_request.finish();

                    let retry = requests.next().await.unwrap();
                    assert_eq!(
                        retry.request.document.snapshot.text(),
                        "// let x = 1;\nlet y = 5;\n"
                    );
                    retry.respond(replace(22..23, "6"));
                    retry.finish();
                })
            })
        });

        let first = first.unwrap().unwrap();
        assert_eq!(first.source, NextEditSource::Fetched);
        let second = second.unwrap().unwrap();
        assert_eq!(second.source, NextEditSource::Fetched);
        assert_ne!(second.request_id, first.request_id);
        assert_eq!(second.edit.base().text(), "// let x = 1;\nlet y = 5;\n");
        assert_eq!(second.edit.apply().text(), "// let x = 1;\nlet y = 6;\n");

        let cached = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(cached.source, NextEditSource::Cached);
        assert_eq!(cached.request_id, second.request_id);
        assert_eq!(backend.request_count(), 2);
    }

    #[test]
    fn test_stale_request_is_reused() {
        let config = NextEditConfig {
            reuse_stale_requests: true,
            ..test_config()
        };
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("a b c", 2, config);

        let result = run(&executor, async {
            let mut call = Box::pin(provider.get_next_edit(&document, TYPING));
            assert!(futures::poll!(&mut call).is_pending());
            let request = requests.next().await.unwrap();
            workspace.edit(&document, StringEdit::insert(0, "// ")).unwrap();

            let (result, ()) = futures::join!(provider.get_next_edit(&document, TYPING), async {
                // The second caller keeps the request alive past the grace period.
                drop(call);
                Timer::after(Duration::from_millis(150)).await;
                assert!(!request.responder.is_closed());
                request.respond(replace(2..3, "B"));
                request.finish();
            });
            result
        });
        let result = result.unwrap().unwrap();
        assert_eq!(result.source, NextEditSource::Rebased);
        assert_eq!(result.edit.apply().text(), "// a B c");
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_fetch_failure_is_surfaced() {
        let TestContext {
            executor,
            mut requests,
            provider,
            document,
            ..
        } = setup("fn main() {}", 11, test_config());

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.fail(anyhow!("model overloaded"));
                request.finish();
            })
        });
        let error = result.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<NextEditError>(),
            Some(NextEditError::FetchFailure(_))
        ));
        assert!(error.to_string().contains("model overloaded"));
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::Failed(NextEditError::FetchFailure(_)))
        ));
    }

    #[test]
    fn test_no_suggestions_window_is_cached() {
        let text = "fn main() {\n    let x = 1;\n}\n\nfn other() {}\n";
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup(text, 20, test_config());

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(PredictionEvent::NoSuggestions {
                    window: Some(0..29),
                });
                request.finish();
            })
        });
        assert!(result.unwrap().is_none());

        // Edits outside the window keep it valid.
        workspace.edit(&document, StringEdit::insert(43, "\n")).unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::NoSuggestions))
        ));
        assert_eq!(backend.request_count(), 1);

        // Edits inside it invalidate it.
        workspace
            .edit(&document, StringEdit::replace(24..25, "2"))
            .unwrap();
        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                // Both edits happened in quick succession and are grouped.
                assert_eq!(request.request.history.len(), 1);
                request.finish();
            })
        });
        assert!(result.unwrap().is_none());
        assert_eq!(backend.request_count(), 2);
    }

    #[test]
    fn test_rejected_edits_are_not_suggested_again() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("items.push(item)", 12, test_config());

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(replace(10..16, "(OLDiTEM)"));
                request.finish();
            })
        });
        let result = result.unwrap().unwrap();
        provider.handle_shown(&result);
        provider.handle_rejection(&result);

        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::Rejected))
        ));

        // Unrelated edits keep the rejection in place.
        workspace
            .edit(&document, StringEdit::insert(0, "let items = [];\n"))
            .unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_rejecting_after_an_unrelated_edit() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("items.push(item)", 12, test_config());

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(replace(11..15, "OLDiTEM"));
                request.finish();
            })
        });
        let result = result.unwrap().unwrap();
        provider.handle_shown(&result);

        // The user keeps typing elsewhere before dismissing the suggestion.
        workspace
            .edit(&document, StringEdit::insert(0, "let items = [];\n"))
            .unwrap();
        provider.handle_rejection(&result);

        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::Rejected))
        ));
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_recently_shown_edit_of_rejected_request() {
        let config = NextEditConfig {
            cache_tracks_rejections: true,
            ..test_config()
        };
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("a b c", 2, config);

        let (shown, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(replace(2..3, "B"));
                request.finish();
            })
        });
        let shown = shown.unwrap().unwrap();
        provider.handle_shown(&shown);

        workspace.edit(&document, StringEdit::insert(5, "x")).unwrap();
        let rebased = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(rebased.source, NextEditSource::Rebased);
        assert_eq!(rebased.request_id, shown.request_id);
        provider.handle_shown(&rebased);
        provider.handle_rejection(&rebased);

        // Back at the text the first edit was shown for.
        workspace.edit(&document, StringEdit::delete(5..6)).unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::RejectedByRequest))
        ));
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_cache_tracks_rejections_by_request() {
        let config = NextEditConfig {
            cache_tracks_rejections: true,
            ..test_config()
        };
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("fn main() {\n}", 11, config);

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(PredictionEvent::Edit {
                    edit: StringEdit::insert(11, "\n    todo!();"),
                    window: None,
                });
                request.finish();
            })
        });
        provider.handle_rejection(&result.unwrap().unwrap());

        // Typing part of the rejected edit leaves a different edit, but one
        // that still came from the rejected request.
        workspace
            .edit(&document, StringEdit::insert(11, "\n    to"))
            .unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING));
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::RejectedByRequest))
        ));
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_typing_a_prefix_of_a_cached_edit() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("fn main() {\n}", 11, test_config());

        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(PredictionEvent::Edit {
                    edit: StringEdit::insert(11, "\n    todo!();"),
                    window: None,
                });
                request.finish();
            })
        });
        provider.handle_ignored(&result.unwrap().unwrap());

        workspace
            .edit(&document, StringEdit::insert(11, "\n    to"))
            .unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(result.source, NextEditSource::Rebased);
        assert_eq!(result.edit.edit(), &StringEdit::insert(18, "do!();"));
        assert_eq!(result.edit.apply().text(), "fn main() {\n    todo!();\n}");
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_recently_shown_edit_is_reused() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("a b c", 2, test_config());

        let (shown, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(replace(2..3, "B"));
                request.finish();
            })
        });
        let shown = shown.unwrap().unwrap();
        provider.handle_shown(&shown);

        // Moving the cursor does not hide an edit the user is looking at.
        workspace.set_selection(&document, 0..0).unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(result.source, NextEditSource::RecentlyShown);
        assert_eq!(result.id, shown.id);

        provider.handle_acceptance(&shown);
        provider.clear_cache();
        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                requests.next().await.unwrap().finish();
            })
        });
        assert!(result.unwrap().is_none());
        assert_eq!(backend.request_count(), 2);
    }

    fn shown_result(document: &DocumentId, text: &str, edit: StringEdit) -> NextEditResult {
        NextEditResult {
            id: Uuid::new_v4(),
            request_id: RequestId::new(),
            document_id: document.clone(),
            edit: RootedEdit::new(TextSnapshot::new(text), edit).unwrap(),
            window: None,
            source: NextEditSource::Fetched,
            subsequent_k: 0,
        }
    }

    #[test]
    fn test_recently_shown_edits_are_bounded() {
        let TestContext {
            executor,
            workspace,
            backend,
            mut requests,
            provider,
            document,
        } = setup("0", 0, test_config());

        let shown = (0..=10)
            .map(|ix| shown_result(&document, &ix.to_string(), StringEdit::insert(0, "x")))
            .collect::<Vec<_>>();
        for result in &shown {
            provider.handle_shown(result);
        }
        assert_eq!(provider.state.lock().recently_shown.len(), 10);

        // The oldest one was forgotten.
        let (result, ()) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                requests.next().await.unwrap().finish();
            })
        });
        assert!(result.unwrap().is_none());
        assert_eq!(backend.request_count(), 1);

        workspace
            .edit(&document, StringEdit::replace(0..1, "5"))
            .unwrap();
        let result = run(&executor, provider.get_next_edit(&document, TYPING))
            .unwrap()
            .unwrap();
        assert_eq!(result.source, NextEditSource::RecentlyShown);
        assert_eq!(result.id, shown[5].id);
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_set_config_clamps_capacities() {
        let TestContext {
            provider, document, ..
        } = setup("a b c", 2, test_config());

        for ix in 0..5 {
            provider.handle_shown(&shown_result(
                &document,
                &format!("text {ix}"),
                StringEdit::insert(0, "x"),
            ));
        }
        provider.handle_rejection(&shown_result(&document, "a b c", StringEdit::insert(0, "x")));
        provider.handle_rejection(&shown_result(&document, "a b c", StringEdit::insert(5, "y")));
        assert_eq!(provider.state.lock().rejections.len(), 2);

        let config = NextEditConfig {
            recently_shown_capacity: 2,
            rejection_capacity: 1,
            ..test_config()
        };
        provider.set_config(config.clone());
        assert_eq!(provider.config(), config);

        let state = provider.state.lock();
        assert_eq!(state.recently_shown.len(), 2);
        assert_eq!(state.recently_shown[0].edit.base().text(), "text 3");
        assert_eq!(state.rejections.len(), 1);
        assert!(state.rejections.is_rejected(
            &document,
            &TextSnapshot::new("a b c"),
            &StringEdit::insert(5, "y")
        ));
        assert!(!state.rejections.is_rejected(
            &document,
            &TextSnapshot::new("a b c"),
            &StringEdit::insert(0, "x")
        ));
    }

    #[test]
    fn test_request_is_cancelled_before_backend_call() {
        let config = NextEditConfig {
            debounce_ms: 30,
            ..test_config()
        };
        let TestContext {
            executor,
            backend,
            provider,
            document,
            ..
        } = setup("a b c", 2, config);

        run(&executor, async {
            let mut call = Box::pin(provider.get_next_edit(&document, TYPING));
            assert!(futures::poll!(&mut call).is_pending());
            drop(call);
            Timer::after(Duration::from_millis(80)).await;
        });
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_grace_period_keeps_request_alive() {
        let TestContext {
            executor,
            backend,
            mut requests,
            provider,
            document,
            ..
        } = setup("a b c", 2, test_config());

        let result = run(&executor, async {
            let mut call = Box::pin(provider.get_next_edit(&document, TYPING));
            assert!(futures::poll!(&mut call).is_pending());
            let request = requests.next().await.unwrap();
            drop(call);

            // A caller arriving within the grace period joins the same request.
            let (result, ()) = futures::join!(
                provider.get_next_edit(&document, TYPING),
                async move {
                    request.respond(replace(2..3, "B"));
                    request.finish();
                }
            );
            result
        });
        assert_eq!(result.unwrap().unwrap().edit.apply().text(), "a B c");
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_abandoned_request_is_cancelled_after_grace_period() {
        let TestContext {
            executor,
            backend,
            mut requests,
            provider,
            document,
            ..
        } = setup("a b c", 2, test_config());

        let result = run(&executor, async {
            let mut call = Box::pin(provider.get_next_edit(&document, TYPING));
            assert!(futures::poll!(&mut call).is_pending());
            let abandoned = requests.next().await.unwrap();
            drop(call);

            Timer::after(Duration::from_millis(150)).await;
            assert!(abandoned.responder.is_closed());

            let (result, ()) = futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                request.respond(replace(4..5, "C"));
                request.finish();
            });
            result
        });
        assert_eq!(result.unwrap().unwrap().edit.apply().text(), "a b C");
        assert_eq!(backend.request_count(), 2);
    }

    #[test]
    fn test_fetch_timeout_is_not_an_error() {
        let config = NextEditConfig {
            fetch_timeout_ms: 30,
            ..test_config()
        };
        let TestContext {
            executor,
            mut requests,
            provider,
            document,
            ..
        } = setup("a b c", 2, config);

        let (result, _request) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                requests.next().await.unwrap()
            })
        });
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::Timeout))
        ));
    }

    #[test]
    fn test_forget_document_cancels_requests() {
        let TestContext {
            executor,
            mut requests,
            provider,
            document,
            ..
        } = setup("a b c", 2, test_config());

        let (result, _request) = run(&executor, async {
            futures::join!(provider.get_next_edit(&document, TYPING), async {
                let request = requests.next().await.unwrap();
                provider.forget_document(&document);
                request
            })
        });
        assert!(result.unwrap().is_none());
        assert!(matches!(
            provider.last_outcome(),
            Some(NextEditOutcome::NoEdit(NoNextEditReason::GotCancelled))
        ));
    }

    #[test]
    fn test_unknown_document() {
        let TestContext {
            executor, provider, ..
        } = setup("", 0, test_config());
        let error = run(
            &executor,
            provider.get_next_edit(&DocumentId::from("untitled:9"), TYPING),
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<NextEditError>(),
            Some(NextEditError::Unexpected(_))
        ));
    }
}
