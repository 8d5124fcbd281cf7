use crate::{DocumentChange, DocumentId, HistoryConfig};
use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};
use string_edit::{StringEdit, TextSnapshot};

#[derive(Clone, Debug)]
pub struct HistoryEvent {
    pub document_id: DocumentId,
    pub old_snapshot: TextSnapshot,
    pub new_snapshot: TextSnapshot,
    pub edit: StringEdit,
    pub timestamp: Instant,
}

/// Recent edits across all documents, given to the backend as context.
pub struct EditHistory {
    events: VecDeque<HistoryEvent>,
    max_events: usize,
    grouping_interval: Duration,
}

impl EditHistory {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: config.max_events,
            grouping_interval: config.grouping_interval(),
        }
    }

    pub fn push(&mut self, change: &DocumentChange, timestamp: Instant) {
        if self.max_events == 0 {
            return;
        }

        if let Some(last) = self.events.back_mut()
            && last.document_id == change.document_id
            && last.new_snapshot == change.old_snapshot
            && timestamp.duration_since(last.timestamp) <= self.grouping_interval
        {
            // Coalesce edits for the same document when they happen one after the other.
            last.edit = last.edit.compose(&change.edit);
            last.new_snapshot = change.new_snapshot.clone();
            last.timestamp = timestamp;
            return;
        }

        if self.events.len() >= self.max_events {
            self.events.drain(..(self.max_events / 2).max(1));
        }

        self.events.push_back(HistoryEvent {
            document_id: change.document_id.clone(),
            old_snapshot: change.old_snapshot.clone(),
            new_snapshot: change.new_snapshot.clone(),
            edit: change.edit.clone(),
            timestamp,
        });
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &HistoryEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The latest known text of every document in the history except
    /// `exclude`, most recently edited first.
    pub fn related_documents(&self, exclude: &DocumentId) -> Vec<(DocumentId, TextSnapshot)> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .rev()
            .filter(|event| &event.document_id != exclude)
            .filter(|event| seen.insert(event.document_id.clone()))
            .map(|event| (event.document_id.clone(), event.new_snapshot.clone()))
            .collect()
    }

    pub fn set_config(&mut self, config: &HistoryConfig) {
        self.max_events = config.max_events;
        self.grouping_interval = config.grouping_interval();
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    pub fn forget_document(&mut self, document_id: &DocumentId) {
        self.events.retain(|event| &event.document_id != document_id);
    }
}
