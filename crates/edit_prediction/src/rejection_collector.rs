use crate::{DocumentChange, DocumentId, RebaseTracker, Rebaseable, TrackedId};
use std::collections::{HashMap, VecDeque};
use string_edit::{RootedEdit, StringEdit, TextSnapshot};

struct RejectedEdit(RootedEdit);

impl Rebaseable for RejectedEdit {
    fn rebase(&self, change: &DocumentChange) -> Option<Self> {
        if self.0.base() != &change.old_snapshot {
            return None;
        }
        self.0
            .rebase(&change.edit, change.new_snapshot.clone())
            .map(RejectedEdit)
    }
}

/// Remembers edits the user declined so they are not suggested again.
///
/// Rejections are carried forward over later changes to their document and
/// forgotten once a change touches the rejected region. At most `capacity`
/// rejections are remembered across all documents; the oldest one goes
/// first.
pub struct RejectionCollector {
    documents: HashMap<DocumentId, RebaseTracker<RejectedEdit>>,
    queue: VecDeque<(DocumentId, TrackedId)>,
    capacity: usize,
}

impl RejectionCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            documents: HashMap::default(),
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Records that `edit`, expressed against `snapshot`, was rejected.
    /// Returns whether a new rejection was recorded.
    pub fn reject(
        &mut self,
        document_id: &DocumentId,
        snapshot: &TextSnapshot,
        edit: &StringEdit,
    ) -> bool {
        let Some(rejected) = trimmed(snapshot, edit) else {
            return false;
        };

        let tracker = self.documents.entry(document_id.clone()).or_default();
        if tracker
            .iter()
            .any(|(_, existing)| existing.0.equals(&rejected))
        {
            log::debug!("edit for {document_id} was already rejected");
            return false;
        }

        let id = tracker.track(RejectedEdit(rejected));
        self.queue.push_back((document_id.clone(), id));
        log::debug!(
            "rejected edit for {document_id} ({} rejections tracked)",
            self.queue.len()
        );
        self.evict_overflow();
        true
    }

    pub fn is_rejected(
        &self,
        document_id: &DocumentId,
        snapshot: &TextSnapshot,
        edit: &StringEdit,
    ) -> bool {
        let Some(tracker) = self.documents.get(document_id) else {
            return false;
        };
        let Some(candidate) = trimmed(snapshot, edit) else {
            return false;
        };
        tracker
            .iter()
            .any(|(_, rejected)| rejected.0.equals(&candidate))
    }

    pub fn handle_change(&mut self, change: &DocumentChange) {
        let Some(tracker) = self.documents.get_mut(&change.document_id) else {
            return;
        };

        let mut disposed = Vec::new();
        tracker.handle_change(change, |id, _| disposed.push(id));
        if !disposed.is_empty() {
            log::debug!(
                "forgot {} rejection(s) for {} after version {}",
                disposed.len(),
                change.document_id,
                change.version
            );
            self.queue.retain(|(document_id, id)| {
                document_id != &change.document_id || !disposed.contains(id)
            });
        }
        if tracker.is_empty() {
            self.documents.remove(&change.document_id);
        }
    }

    pub fn forget_document(&mut self, document_id: &DocumentId) {
        if self.documents.remove(document_id).is_some() {
            self.queue.retain(|(id, _)| id != document_id);
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_overflow();
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn evict_overflow(&mut self) {
        while self.queue.len() > self.capacity {
            let Some((document_id, id)) = self.queue.pop_front() else {
                break;
            };
            if let Some(tracker) = self.documents.get_mut(&document_id) {
                tracker.untrack(id);
                if tracker.is_empty() {
                    self.documents.remove(&document_id);
                }
            }
            log::debug!("evicted oldest rejection for {document_id}");
        }
    }
}

fn trimmed(snapshot: &TextSnapshot, edit: &StringEdit) -> Option<RootedEdit> {
    let rooted = RootedEdit::new(snapshot.clone(), edit.clone())
        .map_err(|error| log::warn!("ignoring invalid edit for rejection check: {error}"))
        .ok()?;
    let trimmed = rooted.trimmed();
    (!trimmed.edit().is_empty()).then_some(trimmed)
}
