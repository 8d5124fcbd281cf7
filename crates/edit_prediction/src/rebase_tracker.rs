use crate::DocumentChange;
use std::mem;
use util::post_inc;

/// Something rooted at a document snapshot that can be carried forward over
/// the document's subsequent changes.
pub trait Rebaseable: Sized {
    /// Returns this item expressed against `change.new_snapshot`, or `None` if
    /// it can no longer be carried forward.
    fn rebase(&self, change: &DocumentChange) -> Option<Self>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedId(usize);

/// Holds items rooted at the current snapshot of one document and rebases
/// all of them over every change, in the order the changes happened. Items
/// that fail to rebase are disposed.
pub struct RebaseTracker<T> {
    items: Vec<(TrackedId, T)>,
    next_id: usize,
}

impl<T> Default for RebaseTracker<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T: Rebaseable> RebaseTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, item: T) -> TrackedId {
        let id = TrackedId(post_inc(&mut self.next_id));
        self.items.push((id, item));
        id
    }

    pub fn untrack(&mut self, id: TrackedId) -> Option<T> {
        let ix = self.items.iter().position(|(item_id, _)| *item_id == id)?;
        Some(self.items.remove(ix).1)
    }

    pub fn get(&self, id: TrackedId) -> Option<&T> {
        self.items
            .iter()
            .find_map(|(item_id, item)| (*item_id == id).then_some(item))
    }

    /// Iterates items from the oldest to the most recently tracked.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (TrackedId, &T)> {
        self.items.iter().map(|(id, item)| (*id, item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn handle_change(
        &mut self,
        change: &DocumentChange,
        mut on_dispose: impl FnMut(TrackedId, T),
    ) {
        for (id, item) in mem::take(&mut self.items) {
            match item.rebase(change) {
                Some(rebased) => self.items.push((id, rebased)),
                None => on_dispose(id, item),
            }
        }
    }

    pub fn clear(&mut self, mut on_dispose: impl FnMut(TrackedId, T)) {
        for (id, item) in mem::take(&mut self.items) {
            on_dispose(id, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentId;
    use pretty_assertions::assert_eq;
    use string_edit::{RootedEdit, StringEdit, TextSnapshot};

    struct Tracked(RootedEdit);

    impl Rebaseable for Tracked {
        fn rebase(&self, change: &DocumentChange) -> Option<Self> {
            if self.0.base() != &change.old_snapshot {
                return None;
            }
            self.0
                .rebase(&change.edit, change.new_snapshot.clone())
                .map(Tracked)
        }
    }

    fn make_change(old: &TextSnapshot, edit: StringEdit) -> DocumentChange {
        DocumentChange {
            document_id: DocumentId::from("untitled"),
            old_snapshot: old.clone(),
            new_snapshot: edit.apply_to_snapshot(old),
            edit,
            version: 1,
        }
    }

    #[test]
    fn test_conflicting_items_are_disposed() {
        let base = TextSnapshot::from("let a = 1;\nlet b = 2;\n");
        let mut tracker = RebaseTracker::new();
        let first = tracker.track(Tracked(
            RootedEdit::new(base.clone(), StringEdit::replace(8..9, "10")).unwrap(),
        ));
        let second = tracker.track(Tracked(
            RootedEdit::new(base.clone(), StringEdit::replace(19..20, "20")).unwrap(),
        ));

        let mut disposed = Vec::new();
        let change = make_change(&base, StringEdit::replace(4..5, "alpha"));
        tracker.handle_change(&change, |id, _| disposed.push(id));
        assert!(disposed.is_empty());
        assert_eq!(
            tracker.get(first).unwrap().0.apply().text(),
            "let alpha = 10;\nlet b = 2;\n"
        );

        let change = make_change(&change.new_snapshot, StringEdit::replace(23..24, "3"));
        tracker.handle_change(&change, |id, _| disposed.push(id));
        assert_eq!(disposed, vec![second]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(
            tracker.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            vec![first]
        );

        tracker.clear(|id, _| disposed.push(id));
        assert_eq!(disposed, vec![second, first]);
        assert!(tracker.is_empty());
    }
}
