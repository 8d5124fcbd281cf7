use crate::{
    DocumentChange, DocumentId, DocumentState, RebaseTracker, Rebaseable, RequestId, TrackedId,
};
use std::{
    collections::{HashMap, VecDeque},
    ops::Range,
};
use string_edit::{InvalidEdit, RootedEdit, StringEdit, TextSnapshot};

/// The k-th candidate streamed by a backend request, expressed against the
/// request's snapshot.
#[derive(Clone, Debug)]
pub struct KthNextEdit {
    pub request: RequestId,
    pub k: usize,
    pub request_snapshot: TextSnapshot,
    pub cursor: Option<Range<usize>>,
    pub edit: StringEdit,
    pub window: Option<Range<usize>>,
}

#[derive(Clone, Debug)]
pub struct CachedNextEdit {
    pub request: RequestId,
    pub k: usize,
    pub edit: RootedEdit,
    pub window: Option<Range<usize>>,
    /// Whether the edit was carried forward from an earlier snapshot.
    pub rebased: bool,
    pub rejected_by_request: bool,
}

#[derive(Clone, Debug)]
pub enum CacheLookup {
    Hit(CachedNextEdit),
    /// The backend found nothing to suggest around the cursor.
    NoEdit {
        request: RequestId,
    },
    Miss,
}

struct CachedEntry {
    request: RequestId,
    k: usize,
    snapshot: TextSnapshot,
    // `None` for follow-up candidates, which apply to any selection.
    cursor: Option<Range<usize>>,
    edit: RootedEdit,
    window: Option<Range<usize>>,
    rebased: Option<TrackedId>,
}

struct RebasedEntry {
    request: RequestId,
    k: usize,
    edit: RootedEdit,
    window: Option<Range<usize>>,
}

impl Rebaseable for RebasedEntry {
    fn rebase(&self, change: &DocumentChange) -> Option<Self> {
        Some(Self {
            request: self.request,
            k: self.k,
            edit: interpolate_over(&self.edit, change)?,
            window: self
                .window
                .clone()
                .map(|window| change.edit.map_range(window)),
        })
    }
}

struct NegativeEntry {
    request: RequestId,
    snapshot: TextSnapshot,
    window: Range<usize>,
}

impl Rebaseable for NegativeEntry {
    fn rebase(&self, change: &DocumentChange) -> Option<Self> {
        if self.snapshot != change.old_snapshot || change.edit.intersects(&self.window) {
            return None;
        }
        Some(Self {
            request: self.request,
            snapshot: change.new_snapshot.clone(),
            window: change.edit.map_range(self.window.clone()),
        })
    }
}

#[derive(Default)]
struct DocumentCache {
    entries: VecDeque<CachedEntry>,
    rebased: RebaseTracker<RebasedEntry>,
    negatives: RebaseTracker<NegativeEntry>,
}

struct StreamState {
    // Every candidate stored so far, composed.
    composed: StringEdit,
}

/// Edits predicted for earlier document states, served again when the user
/// comes back to one of those states or when they can be carried forward to
/// the current one.
pub struct PredictionCache {
    documents: HashMap<DocumentId, DocumentCache>,
    streams: HashMap<RequestId, StreamState>,
    rejected_requests: VecDeque<RequestId>,
    capacity_per_document: usize,
    rejection_capacity: usize,
}

impl PredictionCache {
    pub fn new(capacity_per_document: usize, rejection_capacity: usize) -> Self {
        Self {
            documents: HashMap::default(),
            streams: HashMap::default(),
            rejected_requests: VecDeque::new(),
            capacity_per_document,
            rejection_capacity,
        }
    }

    pub fn lookup(&mut self, state: &DocumentState) -> CacheLookup {
        let Some(document) = self.documents.get_mut(&state.id) else {
            return CacheLookup::Miss;
        };
        let cursor = state.cursor();

        if let Some(ix) = document.entries.iter().rposition(|entry| {
            entry.snapshot == state.snapshot
                && (entry.cursor.is_none() || entry.cursor == cursor)
        }) && let Some(entry) = document.entries.remove(ix)
        {
            let hit = CachedNextEdit {
                request: entry.request,
                k: entry.k,
                edit: entry.edit.clone(),
                window: entry.window.clone(),
                rebased: false,
                rejected_by_request: self.rejected_requests.contains(&entry.request),
            };
            document.entries.push_back(entry);
            return CacheLookup::Hit(hit);
        }

        for (_, entry) in document.rebased.iter().rev() {
            if entry.edit.base() != &state.snapshot {
                continue;
            }
            if let (Some(window), Some(cursor)) = (&entry.window, &cursor)
                && !contains(window, cursor)
            {
                continue;
            }
            return CacheLookup::Hit(CachedNextEdit {
                request: entry.request,
                k: entry.k,
                edit: entry.edit.clone(),
                window: entry.window.clone(),
                rebased: true,
                rejected_by_request: self.rejected_requests.contains(&entry.request),
            });
        }

        for (_, entry) in document.negatives.iter().rev() {
            if entry.snapshot == state.snapshot
                && cursor
                    .as_ref()
                    .is_none_or(|cursor| contains(&entry.window, cursor))
            {
                return CacheLookup::NoEdit {
                    request: entry.request,
                };
            }
        }

        CacheLookup::Miss
    }

    /// Stores the k-th candidate of a request. Candidates after the first are
    /// rebased over the ones before them and keyed by the state reached by
    /// accepting those. The first candidate is also carried over `changes`,
    /// the user's edits since the request was issued, and followed from there
    /// on.
    ///
    /// Returns the stored entry, or `None` if the candidate changes nothing or
    /// conflicts with an earlier one.
    pub fn set_kth_next_edit(
        &mut self,
        document_id: &DocumentId,
        next_edit: KthNextEdit,
        changes: &[DocumentChange],
    ) -> Result<Option<CachedNextEdit>, InvalidEdit> {
        let KthNextEdit {
            request,
            k,
            request_snapshot,
            cursor,
            edit,
            window,
        } = next_edit;
        edit.validate(&request_snapshot)?;

        let (base, edit) = if k == 0 {
            self.streams.insert(
                request,
                StreamState {
                    composed: edit.clone(),
                },
            );
            (request_snapshot, edit)
        } else {
            let Some(stream) = self.streams.get_mut(&request) else {
                log::warn!("candidate {k} of request {request} arrived without a first candidate");
                return Ok(None);
            };
            let Some(rebased) = edit.try_rebase(&stream.composed) else {
                log::debug!("candidate {k} of request {request} conflicts with earlier candidates");
                return Ok(None);
            };
            let base = stream.composed.apply_to_snapshot(&request_snapshot);
            stream.composed = stream.composed.compose(&rebased);
            (base, rebased)
        };

        let edit = RootedEdit::new(base.clone(), edit)?.trimmed();
        if edit.edit().is_empty() {
            return Ok(None);
        }

        let document = self.documents.entry(document_id.clone()).or_default();
        let rebased = if k == 0 {
            let mut carried = Some(RebasedEntry {
                request,
                k,
                edit: edit.clone(),
                window: window.clone(),
            });
            for change in changes {
                carried = carried.and_then(|entry| entry.rebase(change));
            }
            match carried {
                Some(entry) => Some(document.rebased.track(entry)),
                None => {
                    log::debug!(
                        "candidate of request {request} no longer applies to {document_id}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let entry = CachedEntry {
            request,
            k,
            snapshot: base,
            cursor: if k == 0 { cursor } else { None },
            edit,
            window,
            rebased,
        };
        let cached = CachedNextEdit {
            request,
            k,
            edit: entry.edit.clone(),
            window: entry.window.clone(),
            rebased: false,
            rejected_by_request: self.rejected_requests.contains(&request),
        };
        document.entries.push_back(entry);
        while document.entries.len() > self.capacity_per_document {
            if let Some(evicted) = document.entries.pop_front()
                && let Some(id) = evicted.rebased
            {
                document.rebased.untrack(id);
            }
        }
        log::debug!("cached candidate {k} of request {request} for {document_id}");

        Ok(Some(cached))
    }

    /// Records that the backend found nothing to suggest in `window` of
    /// `snapshot`, then carries that over `changes`.
    pub fn set_no_next_edit(
        &mut self,
        document_id: &DocumentId,
        snapshot: TextSnapshot,
        window: Range<usize>,
        request: RequestId,
        changes: &[DocumentChange],
    ) {
        let mut entry = Some(NegativeEntry {
            request,
            snapshot,
            window,
        });
        for change in changes {
            entry = entry.and_then(|entry| entry.rebase(change));
        }
        let Some(entry) = entry else {
            log::debug!("no-edit window of request {request} was already edited");
            return;
        };

        let document = self.documents.entry(document_id.clone()).or_default();
        document.negatives.track(entry);
        while document.negatives.len() > self.capacity_per_document {
            let Some((oldest, _)) = document.negatives.iter().next() else {
                break;
            };
            document.negatives.untrack(oldest);
        }
    }

    pub fn handle_change(&mut self, change: &DocumentChange) {
        let Some(document) = self.documents.get_mut(&change.document_id) else {
            return;
        };

        let mut disposed = Vec::new();
        document.rebased.handle_change(change, |id, entry| {
            log::debug!(
                "dropped candidate {} of request {} after version {}",
                entry.k,
                entry.request,
                change.version
            );
            disposed.push(id);
        });
        if !disposed.is_empty() {
            for entry in &mut document.entries {
                if entry.rebased.is_some_and(|id| disposed.contains(&id)) {
                    entry.rebased = None;
                }
            }
        }

        document.negatives.handle_change(change, |_, entry| {
            log::debug!(
                "edit touched no-edit window {:?} of request {}",
                entry.window,
                entry.request
            );
        });
    }

    /// Forgets the stream state of a request once it stopped streaming.
    pub fn finish_request(&mut self, request: RequestId) {
        self.streams.remove(&request);
    }

    pub fn reject_by_request(&mut self, request: RequestId) {
        if self.rejected_requests.contains(&request) {
            return;
        }
        self.rejected_requests.push_back(request);
        while self.rejected_requests.len() > self.rejection_capacity {
            self.rejected_requests.pop_front();
        }
    }

    pub fn is_rejected_by_request(&self, request: RequestId) -> bool {
        self.rejected_requests.contains(&request)
    }

    pub fn set_capacities(&mut self, capacity_per_document: usize, rejection_capacity: usize) {
        self.capacity_per_document = capacity_per_document;
        self.rejection_capacity = rejection_capacity;
        while self.rejected_requests.len() > self.rejection_capacity {
            self.rejected_requests.pop_front();
        }
    }

    pub fn forget_document(&mut self, document_id: &DocumentId) {
        self.documents.remove(document_id);
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.streams.clear();
        self.rejected_requests.clear();
    }
}

fn interpolate_over(edit: &RootedEdit, change: &DocumentChange) -> Option<RootedEdit> {
    let edit = if edit.base() == &change.old_snapshot {
        edit.interpolate(&change.edit, change.new_snapshot.clone())?
    } else if edit.base() == &change.new_snapshot {
        edit.clone()
    } else {
        return None;
    };
    (!edit.is_empty()).then_some(edit)
}

fn contains(window: &Range<usize>, range: &Range<usize>) -> bool {
    window.start <= range.start && range.end <= window.end
}
