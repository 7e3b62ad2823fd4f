use std::collections::BTreeMap;
use std::ops::Bound;

use qst_ir::Label;

/// Label table of a script: which label points at which byte offset.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    offsets: Vec<Option<usize>>,
    /// Labels per offset, each list sorted.
    by_offset: BTreeMap<usize, Vec<Label>>,
}

impl LabelTable {
    /// Build the table from offsets indexed by label. Negative offsets mark unused labels.
    pub fn new(label_offsets: &[i32]) -> Self {
        let mut offsets = Vec::with_capacity(label_offsets.len());
        let mut by_offset: BTreeMap<usize, Vec<Label>> = BTreeMap::new();

        for (label, &offset) in label_offsets.iter().enumerate() {
            let offset = usize::try_from(offset).ok();
            if let (Some(offset), Ok(label)) = (offset, Label::try_from(label)) {
                by_offset.entry(offset).or_default().push(label);
            }
            offsets.push(offset);
        }

        LabelTable { offsets, by_offset }
    }

    pub fn offset(&self, label: Label) -> Option<usize> {
        self.offsets.get(label as usize).copied().flatten()
    }

    pub fn has_label(&self, label: Label) -> bool {
        self.offset(label).is_some()
    }

    /// Labels pointing at `offset`, in ascending order.
    pub fn labels_at(&self, offset: usize) -> &[Label] {
        self.by_offset.get(&offset).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The closest labelled offset strictly after `offset`, with its lowest label.
    pub fn next_after(&self, offset: usize) -> Option<(Label, usize)> {
        self.by_offset
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
            .and_then(|(&next, labels)| labels.first().map(|&label| (label, next)))
    }

    /// All labels with their offsets, ordered by offset, then label.
    pub fn iter(&self) -> impl Iterator<Item = (Label, usize)> + '_ {
        self.by_offset
            .iter()
            .flat_map(|(&offset, labels)| labels.iter().map(move |&label| (label, offset)))
    }
}
