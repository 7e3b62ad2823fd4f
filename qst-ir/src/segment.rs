use std::collections::BTreeMap;

use qst_isa::Format;

use crate::instruction::Instruction;

/// Label number. Labels name byte offsets of segment starts.
pub type Label = u32;

/// Index of a segment within a [`SegmentArena`].
pub type SegmentId = usize;

/// Kind of a segment, ordered by classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentType {
    Data,
    String,
    Instructions,
}

impl SegmentType {
    /// When a label is referenced as several types, the one with the highest priority wins.
    pub fn priority(self) -> u8 {
        match self {
            SegmentType::Data => 0,
            SegmentType::String => 1,
            SegmentType::Instructions => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstructionSegment {
    /// Sorted, without duplicates.
    pub labels: Vec<Label>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSegment {
    pub labels: Vec<Label>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringSegment {
    pub labels: Vec<Label>,
    pub value: String,
    /// On-disk size, only kept when it differs from the canonical padded size.
    pub size: Option<usize>,
}

impl StringSegment {
    pub fn size(&self, format: Format) -> usize {
        self.size
            .unwrap_or_else(|| format.string_segment_size(&self.value))
    }
}

/// A contiguous, single-typed region of bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Instructions(InstructionSegment),
    Data(DataSegment),
    String(StringSegment),
}

impl Segment {
    pub fn ty(&self) -> SegmentType {
        match self {
            Segment::Instructions(_) => SegmentType::Instructions,
            Segment::Data(_) => SegmentType::Data,
            Segment::String(_) => SegmentType::String,
        }
    }

    pub fn labels(&self) -> &[Label] {
        match self {
            Segment::Instructions(s) => &s.labels,
            Segment::Data(s) => &s.labels,
            Segment::String(s) => &s.labels,
        }
    }

    pub fn labels_mut(&mut self) -> &mut Vec<Label> {
        match self {
            Segment::Instructions(s) => &mut s.labels,
            Segment::Data(s) => &mut s.labels,
            Segment::String(s) => &mut s.labels,
        }
    }

    /// Insert `label`, keeping the label list sorted. Returns false if it was already present.
    pub fn add_label(&mut self, label: Label) -> bool {
        let labels = self.labels_mut();
        match labels.binary_search(&label) {
            Ok(_) => false,
            Err(pos) => {
                labels.insert(pos, label);
                true
            }
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self, format: Format) -> usize {
        match self {
            Segment::Instructions(s) => s.instructions.iter().map(|i| i.size(format)).sum(),
            Segment::Data(s) => s.data.len(),
            Segment::String(s) => s.size(format),
        }
    }

    pub fn as_instructions(&self) -> Option<&InstructionSegment> {
        match self {
            Segment::Instructions(s) => Some(s),
            _ => None,
        }
    }
}

/// Decoded bytecode: segments in file order, together covering the whole buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BytecodeIr {
    pub segments: Vec<Segment>,
}

impl BytecodeIr {
    pub fn new(segments: Vec<Segment>) -> Self {
        BytecodeIr { segments }
    }

    pub fn size(&self, format: Format) -> usize {
        self.segments.iter().map(|s| s.size(format)).sum()
    }

    /// Highest label used by any segment.
    pub fn max_label(&self) -> Option<Label> {
        self.segments
            .iter()
            .filter_map(|s| s.labels().last().copied())
            .max()
    }
}

/// Segments under construction, addressed by id and indexed by start offset.
///
/// Ids stay valid for the arena's lifetime. A segment can be replaced in place, e.g. when it's
/// reclassified, without disturbing the index.
#[derive(Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Segment>,
    offsets: Vec<usize>,
    by_offset: BTreeMap<usize, SegmentId>,
}

impl SegmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    /// Add a segment starting at `offset`. The offset must not already start a segment.
    pub fn insert(&mut self, offset: usize, segment: Segment) -> SegmentId {
        let id = self.segments.len();
        self.segments.push(segment);
        self.offsets.push(offset);
        let previous = self.by_offset.insert(offset, id);
        debug_assert!(previous.is_none(), "two segments start at offset {offset}");
        id
    }

    /// The segment starting exactly at `offset`.
    pub fn at(&self, offset: usize) -> Option<SegmentId> {
        self.by_offset.get(&offset).copied()
    }

    pub fn get(&self, id: SegmentId) -> &Segment {
        &self.segments[id]
    }

    pub fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.segments[id]
    }

    pub fn offset(&self, id: SegmentId) -> usize {
        self.offsets[id]
    }

    pub fn replace(&mut self, id: SegmentId, segment: Segment) {
        self.segments[id] = segment;
    }

    /// Segments in offset order, with their start offsets.
    pub fn iter(&self) -> impl Iterator<Item = (usize, SegmentId, &Segment)> {
        self.by_offset
            .iter()
            .map(|(&offset, &id)| (offset, id, &self.segments[id]))
    }

    pub fn into_ir(self) -> BytecodeIr {
        let mut slots: Vec<Option<Segment>> = self.segments.into_iter().map(Some).collect();
        let segments = self
            .by_offset
            .values()
            .filter_map(|&id| slots[id].take())
            .collect();
        BytecodeIr { segments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_label_keeps_order() {
        let mut segment = Segment::Data(DataSegment::default());
        assert!(segment.add_label(5));
        assert!(segment.add_label(1));
        assert!(!segment.add_label(5));
        assert!(segment.add_label(3));
        assert_eq!(segment.labels(), [1, 3, 5]);
    }

    #[test]
    fn arena_orders_by_offset() {
        let mut arena = SegmentArena::new();
        let late = arena.insert(8, Segment::Data(DataSegment::default()));
        let early = arena.insert(0, Segment::Data(DataSegment::default()));
        assert_eq!(arena.at(8), Some(late));
        assert_eq!(arena.offset(early), 0);
        let order: Vec<_> = arena.iter().map(|(offset, id, _)| (offset, id)).collect();
        assert_eq!(order, [(0, early), (8, late)]);
    }

    #[test]
    fn string_segment_size_override() {
        let mut segment = StringSegment {
            labels: vec![],
            value: "abc".to_string(),
            size: None,
        };
        assert_eq!(segment.size(Format::Legacy), 4);
        segment.size = Some(12);
        assert_eq!(segment.size(Format::Legacy), 12);
    }
}
