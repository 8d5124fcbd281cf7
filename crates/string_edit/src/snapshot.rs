use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

/// An immutable version of a document's text.
///
/// Cloning is cheap. Two snapshots compare equal when their text is equal;
/// [`TextSnapshot::same_version`] tells whether they are literally the same
/// version.
#[derive(Clone, Default)]
pub struct TextSnapshot(Arc<str>);

impl TextSnapshot {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn same_version(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for TextSnapshot {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for TextSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.same_version(other) || self.0 == other.0
    }
}

impl Eq for TextSnapshot {}

impl Hash for TextSnapshot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for TextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextSnapshot").field(&&*self.0).finish()
    }
}

impl From<&str> for TextSnapshot {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TextSnapshot {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}
