use anyhow::{Context as _, Result, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    ops::Range,
    path::PathBuf,
    sync::{Arc, Weak},
};
use string_edit::{Bias, StringEdit, TextSnapshot};

/// Identity of a document, stable across edits.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Arc<str>);

impl DocumentId {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range<usize>,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

/// What the host knows about a document at one point in time.
#[derive(Clone, Debug)]
pub struct DocumentState {
    pub id: DocumentId,
    pub snapshot: TextSnapshot,
    pub version: usize,
    pub selections: Vec<Range<usize>>,
    pub language_id: Option<Arc<str>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl DocumentState {
    /// The primary selection.
    pub fn cursor(&self) -> Option<Range<usize>> {
        self.selections.first().cloned()
    }
}

/// One entry of the ordered change feed of a document.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub document_id: DocumentId,
    pub old_snapshot: TextSnapshot,
    pub new_snapshot: TextSnapshot,
    pub edit: StringEdit,
    pub version: usize,
}

pub type ChangeCallback = Box<dyn Fn(&DocumentChange) + Send + Sync>;

type ChangeSubscriber = dyn Fn(&DocumentChange) + Send + Sync;

/// The host editor, as seen by the prediction core.
pub trait Workspace: Send + Sync {
    fn document(&self, id: &DocumentId) -> Option<DocumentState>;

    fn workspace_root(&self, id: &DocumentId) -> Option<PathBuf>;

    /// Registers `callback` to be invoked synchronously, in order, once for
    /// every edit applied to any document. Dropping the returned
    /// [`Subscription`] unregisters it.
    fn subscribe(&self, callback: ChangeCallback) -> Subscription;
}

#[must_use]
pub struct Subscription(#[allow(dead_code)] Arc<ChangeSubscriber>);

/// Fans document changes out to live subscriptions.
#[derive(Default)]
pub struct ChangeTopic(Mutex<Vec<Weak<ChangeSubscriber>>>);

impl ChangeTopic {
    pub fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        let callback: Arc<ChangeSubscriber> = Arc::from(callback);
        self.0.lock().push(Arc::downgrade(&callback));
        Subscription(callback)
    }

    pub fn publish(&self, change: &DocumentChange) {
        let subscribers = {
            let mut subscriptions = self.0.lock();
            subscriptions.retain(|subscription| subscription.strong_count() > 0);
            subscriptions
                .iter()
                .filter_map(Weak::upgrade)
                .collect::<Vec<_>>()
        };
        for subscriber in subscribers {
            subscriber(change);
        }
    }
}

/// An in-memory [`Workspace`].
pub struct LocalWorkspace {
    root: Option<PathBuf>,
    documents: Mutex<HashMap<DocumentId, DocumentState>>,
    // Serializes edits so that subscribers observe them in version order.
    edit_lock: Mutex<()>,
    changes: ChangeTopic,
}

impl LocalWorkspace {
    pub fn new(root: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            root,
            documents: Default::default(),
            edit_lock: Mutex::new(()),
            changes: ChangeTopic::default(),
        })
    }

    pub fn open_document(
        &self,
        id: DocumentId,
        text: impl Into<TextSnapshot>,
        language_id: Option<&str>,
    ) -> DocumentState {
        let state = DocumentState {
            id: id.clone(),
            snapshot: text.into(),
            version: 0,
            selections: vec![0..0],
            language_id: language_id.map(Arc::from),
            diagnostics: Vec::new(),
        };
        log::debug!("opened document {id}");
        self.documents.lock().insert(id, state.clone());
        state
    }

    pub fn close_document(&self, id: &DocumentId) -> bool {
        self.documents.lock().remove(id).is_some()
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids = self.documents.lock().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Applies `edit` to the document's current text and notifies every
    /// subscriber before returning.
    pub fn edit(&self, id: &DocumentId, edit: StringEdit) -> Result<DocumentChange> {
        let _edit_guard = self.edit_lock.lock();
        let change = {
            let mut documents = self.documents.lock();
            let document = documents
                .get_mut(id)
                .with_context(|| format!("no open document {id}"))?;
            edit.validate(&document.snapshot)
                .with_context(|| format!("invalid edit for document {id}"))?;

            let old_snapshot = document.snapshot.clone();
            let new_snapshot = edit.apply_to_snapshot(&old_snapshot);
            document.snapshot = new_snapshot.clone();
            document.version += 1;
            for selection in &mut document.selections {
                *selection = edit.map_offset(selection.start, Bias::Right)
                    ..edit.map_offset(selection.end, Bias::Right);
            }
            for diagnostic in &mut document.diagnostics {
                diagnostic.range = edit.map_range(diagnostic.range.clone());
            }

            DocumentChange {
                document_id: id.clone(),
                old_snapshot,
                new_snapshot,
                edit,
                version: document.version,
            }
        };
        self.changes.publish(&change);
        Ok(change)
    }

    pub fn set_selections(&self, id: &DocumentId, selections: Vec<Range<usize>>) -> Result<()> {
        let mut documents = self.documents.lock();
        let document = documents
            .get_mut(id)
            .with_context(|| format!("no open document {id}"))?;
        if let Some(selection) = selections
            .iter()
            .find(|selection| selection.start > selection.end || selection.end > document.snapshot.len())
        {
            return Err(anyhow!("selection {selection:?} is out of bounds for {id}"));
        }
        document.selections = selections;
        Ok(())
    }

    pub fn set_selection(&self, id: &DocumentId, selection: Range<usize>) -> Result<()> {
        self.set_selections(id, vec![selection])
    }

    pub fn set_diagnostics(&self, id: &DocumentId, diagnostics: Vec<Diagnostic>) -> Result<()> {
        let mut documents = self.documents.lock();
        let document = documents
            .get_mut(id)
            .with_context(|| format!("no open document {id}"))?;
        document.diagnostics = diagnostics;
        Ok(())
    }
}

impl Workspace for LocalWorkspace {
    fn document(&self, id: &DocumentId) -> Option<DocumentState> {
        self.documents.lock().get(id).cloned()
    }

    fn workspace_root(&self, id: &DocumentId) -> Option<PathBuf> {
        if self.documents.lock().contains_key(id) {
            self.root.clone()
        } else {
            None
        }
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        self.changes.subscribe(callback)
    }
}
