use crate::{InvalidEdit, StringEdit, TextSnapshot};

/// An edit together with the snapshot it was expressed against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootedEdit {
    base: TextSnapshot,
    edit: StringEdit,
}

impl RootedEdit {
    pub fn new(base: TextSnapshot, edit: StringEdit) -> Result<Self, InvalidEdit> {
        edit.validate(&base)?;
        Ok(Self { base, edit })
    }

    pub fn base(&self) -> &TextSnapshot {
        &self.base
    }

    pub fn edit(&self) -> &StringEdit {
        &self.edit
    }

    pub fn apply(&self) -> TextSnapshot {
        self.edit.apply_to_snapshot(&self.base)
    }

    pub fn trimmed(&self) -> Self {
        Self {
            base: self.base.clone(),
            edit: self.edit.trim(&self.base),
        }
    }

    /// Whether applying this edit would leave the base unchanged.
    pub fn is_empty(&self) -> bool {
        self.edit.trim(&self.base).is_empty()
    }

    /// Carries this edit over `change`, which was applied to the same base and
    /// produced `new_base`. Returns `None` on conflict.
    pub fn rebase(&self, change: &StringEdit, new_base: TextSnapshot) -> Option<Self> {
        let edit = self.edit.try_rebase(change)?;
        Some(Self {
            base: new_base,
            edit,
        })
    }

    /// Like [`RootedEdit::rebase`], but lets `change` type a prefix of one of
    /// our replacements.
    pub fn interpolate(&self, change: &StringEdit, new_base: TextSnapshot) -> Option<Self> {
        let edit = self.edit.interpolate(change)?;
        Some(Self {
            base: new_base,
            edit,
        })
    }

    /// Structural equality after trimming both edits against their base.
    pub fn equals(&self, other: &Self) -> bool {
        self.base == other.base && self.edit.trim(&self.base) == other.edit.trim(&other.base)
    }
}
