mod rooted_edit;
mod snapshot;

pub use rooted_edit::RootedEdit;
pub use snapshot::TextSnapshot;

use std::{cmp, ops::Range, sync::Arc};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Bias {
    #[default]
    Left,
    Right,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidEdit {
    #[error("replacement range {0:?} is reversed")]
    Reversed(Range<usize>),
    #[error("replacement {first:?} overlaps replacement {second:?}")]
    Overlapping {
        first: Range<usize>,
        second: Range<usize>,
    },
    #[error("replacement {range:?} is out of bounds for a text of {len} bytes")]
    OutOfBounds { range: Range<usize>, len: usize },
    #[error("replacement {0:?} does not fall on character boundaries")]
    NotCharBoundary(Range<usize>),
}

/// Replaces the text in `range` with `new_text`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StringReplacement {
    pub range: Range<usize>,
    pub new_text: Arc<str>,
}

impl StringReplacement {
    pub fn new(range: Range<usize>, new_text: impl Into<Arc<str>>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<Arc<str>>) -> Self {
        Self::new(offset..offset, text)
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, "")
    }

    pub fn old_len(&self) -> usize {
        self.range.len()
    }

    pub fn new_len(&self) -> usize {
        self.new_text.len()
    }

    /// How much longer the text gets when this replacement is applied.
    pub fn delta(&self) -> isize {
        self.new_len() as isize - self.old_len() as isize
    }

    /// Whether applying this replacement leaves any text unchanged.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty() && self.new_text.is_empty()
    }

    /// Two replacements of the same base text conflict when they touch the
    /// same characters. Ranges that merely touch do not conflict, except for
    /// two insertions at the same offset, whose relative order is ambiguous.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        let (a, b) = (&self.range, &other.range);
        match (a.is_empty(), b.is_empty()) {
            (false, false) => a.start < b.end && b.start < a.end,
            (true, false) => b.start < a.start && a.start < b.end,
            (false, true) => a.start < b.start && b.start < a.end,
            (true, true) => a.start == b.start,
        }
    }

    fn shifted(&self, delta: isize) -> Self {
        Self {
            range: shift(self.range.start, delta)..shift(self.range.end, delta),
            new_text: self.new_text.clone(),
        }
    }
}

/// An ordered set of non-overlapping replacements, all expressed against the
/// same base text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StringEdit {
    replacements: Vec<StringReplacement>,
}

impl StringEdit {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an edit from replacements given in any order. Insertions at the
    /// same offset are concatenated in the order they were given.
    pub fn new(
        replacements: impl IntoIterator<Item = StringReplacement>,
    ) -> Result<Self, InvalidEdit> {
        let mut replacements = replacements.into_iter().collect::<Vec<_>>();
        if let Some(reversed) = replacements
            .iter()
            .find(|replacement| replacement.range.start > replacement.range.end)
        {
            return Err(InvalidEdit::Reversed(reversed.range.clone()));
        }
        replacements.sort_by_key(|replacement| (replacement.range.start, replacement.range.end));
        for pair in replacements.windows(2) {
            if pair[0].range.end > pair[1].range.start {
                return Err(InvalidEdit::Overlapping {
                    first: pair[0].range.clone(),
                    second: pair[1].range.clone(),
                });
            }
        }
        Ok(Self {
            replacements: merge_adjacent_insertions(replacements),
        })
    }

    pub fn single(replacement: StringReplacement) -> Self {
        Self {
            replacements: vec![replacement],
        }
    }

    pub fn replace(range: Range<usize>, new_text: impl Into<Arc<str>>) -> Self {
        Self::single(StringReplacement::new(range, new_text))
    }

    pub fn insert(offset: usize, text: impl Into<Arc<str>>) -> Self {
        Self::single(StringReplacement::insert(offset, text))
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::single(StringReplacement::delete(range))
    }

    pub fn replacements(&self) -> &[StringReplacement] {
        &self.replacements
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn delta(&self) -> isize {
        self.replacements.iter().map(StringReplacement::delta).sum()
    }

    pub fn validate(&self, text: &str) -> Result<(), InvalidEdit> {
        for replacement in &self.replacements {
            let range = replacement.range.clone();
            if range.end > text.len() {
                return Err(InvalidEdit::OutOfBounds {
                    range,
                    len: text.len(),
                });
            }
            if !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
                return Err(InvalidEdit::NotCharBoundary(range));
            }
        }
        Ok(())
    }

    /// Applies this edit to `text`, which must be the text it was expressed
    /// against (see [`StringEdit::validate`]).
    pub fn apply(&self, text: &str) -> String {
        let new_len = (text.len() as isize + self.delta()).max(0) as usize;
        let mut result = String::with_capacity(new_len);
        let mut last_end = 0;
        for replacement in &self.replacements {
            result.push_str(&text[last_end..replacement.range.start]);
            result.push_str(&replacement.new_text);
            last_end = replacement.range.end;
        }
        result.push_str(&text[last_end..]);
        result
    }

    pub fn apply_to_snapshot(&self, snapshot: &TextSnapshot) -> TextSnapshot {
        if self.is_empty() {
            snapshot.clone()
        } else {
            TextSnapshot::new(self.apply(snapshot))
        }
    }

    /// Returns a single edit equivalent to applying `self` and then `other`,
    /// where `other` is expressed against the text produced by `self`.
    pub fn compose(&self, other: &StringEdit) -> StringEdit {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        // Where each of our replacements landed in the intermediate text.
        let mut delta = 0;
        let ours = self
            .replacements
            .iter()
            .map(|replacement| {
                let start = shift(replacement.range.start, delta);
                delta += replacement.delta();
                (start..start + replacement.new_len(), replacement)
            })
            .collect::<Vec<_>>();
        let theirs = &other.replacements;

        let mut replacements = Vec::new();
        let mut ours_ix = 0;
        let mut theirs_ix = 0;
        let mut delta_before = 0;
        while ours_ix < ours.len() || theirs_ix < theirs.len() {
            let ours_start_ix = ours_ix;
            let theirs_start_ix = theirs_ix;

            let starts_with_ours = match (ours.get(ours_ix), theirs.get(theirs_ix)) {
                (Some((intermediate, _)), Some(theirs)) => {
                    intermediate.start <= theirs.range.start
                }
                (Some(_), None) => true,
                _ => false,
            };
            let mut group = if starts_with_ours {
                ours_ix += 1;
                ours[ours_start_ix].0.clone()
            } else {
                theirs_ix += 1;
                theirs[theirs_start_ix].range.clone()
            };

            // Grow the group while replacements from either side overlap or
            // touch it in intermediate coordinates.
            loop {
                if let Some((intermediate, _)) = ours.get(ours_ix)
                    && intermediate.start <= group.end
                {
                    group.end = cmp::max(group.end, intermediate.end);
                    ours_ix += 1;
                } else if let Some(theirs) = theirs.get(theirs_ix)
                    && theirs.range.start <= group.end
                {
                    group.end = cmp::max(group.end, theirs.range.end);
                    theirs_ix += 1;
                } else {
                    break;
                }
            }

            let group_ours = &ours[ours_start_ix..ours_ix];
            let group_theirs = &theirs[theirs_start_ix..theirs_ix];
            let group_delta = group_ours
                .iter()
                .map(|(_, replacement)| replacement.delta())
                .sum::<isize>();

            let old_start = match group_ours.first() {
                Some((intermediate, replacement)) if intermediate.start == group.start => {
                    replacement.range.start
                }
                _ => shift(group.start, -delta_before),
            };
            let old_end = match group_ours.last() {
                Some((intermediate, replacement)) if intermediate.end == group.end => {
                    replacement.range.end
                }
                _ => shift(group.end, -(delta_before + group_delta)),
            };

            let mut new_text = String::new();
            let mut position = group.start;
            for theirs in group_theirs {
                push_intermediate_text(&mut new_text, group_ours, position..theirs.range.start);
                new_text.push_str(&theirs.new_text);
                position = theirs.range.end;
            }
            push_intermediate_text(&mut new_text, group_ours, position..group.end);

            delta_before += group_delta;
            replacements.push(StringReplacement::new(old_start..old_end, new_text));
        }

        StringEdit { replacements }
    }

    /// Expresses this edit against the text produced by `base`, where both
    /// edits were expressed against the same text.
    ///
    /// Returns `None` if any of our replacements conflicts with one of the
    /// base's replacements (see [`StringReplacement::conflicts_with`]).
    pub fn try_rebase(&self, base: &StringEdit) -> Option<StringEdit> {
        self.rebase_impl(base, false)
    }

    /// Like [`StringEdit::try_rebase`], but tolerates `user_edit` typing a
    /// prefix of one of our replacements: when a user replacement covers
    /// exactly the range of one of ours and inserts a prefix of our text, we
    /// keep inserting the remaining suffix after the user's text.
    pub fn interpolate(&self, user_edit: &StringEdit) -> Option<StringEdit> {
        self.rebase_impl(user_edit, true)
    }

    fn rebase_impl(&self, base: &StringEdit, allow_typed_prefix: bool) -> Option<StringEdit> {
        let mut replacements = Vec::with_capacity(self.replacements.len());
        let mut base_replacements = base.replacements.iter().peekable();
        let mut delta = 0;

        'ours: for replacement in &self.replacements {
            while let Some(base_replacement) = base_replacements.peek() {
                if replacement.conflicts_with(base_replacement) {
                    if allow_typed_prefix
                        && base_replacement.range == replacement.range
                        && let Some(suffix) = replacement
                            .new_text
                            .strip_prefix(&*base_replacement.new_text)
                    {
                        let offset =
                            shift(base_replacement.range.start, delta) + base_replacement.new_len();
                        if !suffix.is_empty() {
                            replacements.push(StringReplacement::insert(offset, suffix));
                        }
                        delta += base_replacement.delta();
                        base_replacements.next();
                        continue 'ours;
                    }
                    return None;
                }

                if base_replacement.range.end <= replacement.range.start {
                    delta += base_replacement.delta();
                    base_replacements.next();
                } else {
                    break;
                }
            }
            replacements.push(replacement.shifted(delta));
        }

        Some(StringEdit {
            replacements: merge_adjacent_insertions(replacements),
        })
    }

    /// Shrinks every replacement to the part that actually changes `base`,
    /// removing common leading and trailing text, and drops no-ops.
    pub fn trim(&self, base: &str) -> StringEdit {
        let replacements = self
            .replacements
            .iter()
            .filter_map(|replacement| {
                let old_text = base.get(replacement.range.clone())?;
                let new_text = &*replacement.new_text;

                let prefix_len = common_prefix_len(old_text, new_text);
                let suffix_len =
                    common_suffix_len(&old_text[prefix_len..], &new_text[prefix_len..]);
                let range = replacement.range.start + prefix_len..replacement.range.end - suffix_len;
                let new_text = &new_text[prefix_len..new_text.len() - suffix_len];

                if range.is_empty() && new_text.is_empty() {
                    None
                } else {
                    Some(StringReplacement::new(range, new_text))
                }
            })
            .collect();
        StringEdit {
            replacements: merge_adjacent_insertions(replacements),
        }
    }

    /// Carries an offset of the base text through this edit. Offsets inside
    /// a replaced range, or at an insertion point, snap to the start of the
    /// new text with [`Bias::Left`] and to its end with [`Bias::Right`].
    pub fn map_offset(&self, offset: usize, bias: Bias) -> usize {
        let mut delta = 0;
        for replacement in &self.replacements {
            let range = &replacement.range;
            if offset < range.start {
                break;
            }
            if range.is_empty() {
                if offset > range.start {
                    delta += replacement.delta();
                    continue;
                }
            } else if offset == range.start {
                return shift(offset, delta);
            } else if offset >= range.end {
                delta += replacement.delta();
                continue;
            }

            let start = shift(range.start, delta);
            return match bias {
                Bias::Left => start,
                Bias::Right => start + replacement.new_len(),
            };
        }
        shift(offset, delta)
    }

    /// Carries a range of the base text through this edit, growing it to
    /// cover any text inserted at or inside its boundaries.
    pub fn map_range(&self, range: Range<usize>) -> Range<usize> {
        self.map_offset(range.start, Bias::Left)..self.map_offset(range.end, Bias::Right)
    }

    /// Whether any replacement touches `range`, including insertions at its
    /// boundaries.
    pub fn intersects(&self, range: &Range<usize>) -> bool {
        self.replacements.iter().any(|replacement| {
            let replaced = &replacement.range;
            if replaced.is_empty() {
                range.start <= replaced.start && replaced.start <= range.end
            } else {
                replaced.start < range.end && range.start < replaced.end
                    || range.is_empty() && replaced.start < range.start && range.start < replaced.end
            }
        })
    }
}

fn shift(offset: usize, delta: isize) -> usize {
    offset.saturating_add_signed(delta)
}

fn push_intermediate_text(
    text: &mut String,
    ours: &[(Range<usize>, &StringReplacement)],
    range: Range<usize>,
) {
    if range.is_empty() {
        return;
    }
    for (intermediate, replacement) in ours {
        let start = cmp::max(intermediate.start, range.start);
        let end = cmp::min(intermediate.end, range.end);
        if start < end {
            let slice = replacement
                .new_text
                .get(start - intermediate.start..end - intermediate.start);
            debug_assert!(slice.is_some(), "composed edit splits a character");
            text.push_str(slice.unwrap_or_default());
        }
    }
}

fn merge_adjacent_insertions(replacements: Vec<StringReplacement>) -> Vec<StringReplacement> {
    let mut merged: Vec<StringReplacement> = Vec::with_capacity(replacements.len());
    for replacement in replacements {
        if let Some(last) = merged.last_mut()
            && last.range.is_empty()
            && replacement.range.is_empty()
            && last.range.start == replacement.range.start
        {
            last.new_text = format!("{}{}", last.new_text, replacement.new_text).into();
            continue;
        }
        merged.push(replacement);
    }
    merged
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, a), b)| a == b)
        .last()
        .map_or(0, |((ix, ch), _)| ix + ch.len_utf8())
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(ch, _)| ch.len_utf8())
        .sum()
}
