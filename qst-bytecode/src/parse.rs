use std::collections::{BTreeMap, BTreeSet, HashSet};

use qst_ir::{
    BytecodeIr, ControlFlowGraph, DataSegment, InsnRef, Instruction, InstructionSegment, Label,
    Segment, SegmentArena, SegmentId, SegmentType, StringSegment, ValueSet, get_register_value,
    get_stack_value,
};
use qst_isa::{
    Arg, DecodeError, Format, Opcode, ParamType, code, decode_args, decode_opcode, encode,
};

use crate::labels::LabelTable;
use crate::problem::{Problem, ProblemKind, Severity};

/// Function labels the client provides itself. Scripts may reference them without defining them.
pub const BUILTIN_FUNCTIONS: [Label; 23] = [
    60, 70, 80, 90, 100, 110, 120, 130, 140, 800, 810, 820, 830, 840, 850, 860, 900, 910, 920, 930,
    940, 950, 960,
];

/// A label reference whose analysis yields more candidates than this is treated as unknown.
const MAX_LABEL_CANDIDATES: u64 = 10;

const MAX_TOTAL_NOPS: usize = 20;
const MAX_SEQUENTIAL_NOPS: usize = 10;
const MAX_UNKNOWN_OPCODE_RATIO: f64 = 0.2;
const MAX_POP_WITHOUT_PUSH_RATIO: f64 = 0.2;
const MAX_UNKNOWN_LABEL_RATIO: f64 = 0.2;

/// Result of [`parse_bytecode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// `None` only when a structural error occurred while decoding strictly.
    pub ir: Option<BytecodeIr>,
    pub problems: Vec<Problem>,
}

impl Decoded {
    pub fn has_errors(&self) -> bool {
        self.problems.iter().any(|p| p.severity == Severity::Error)
    }
}

/// Failure that aborts strict decoding.
#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("expected to parse {expected} bytes but parsed {actual} instead")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Partition `buffer` into instruction, string and data segments.
///
/// `label_offsets` maps each label to its byte offset, -1 for unused labels. Decoding starts at
/// `entry_labels`, which are known to point at code. Other segments are discovered through the
/// label references of decoded instructions, whatever can't be reached that way is classified
/// heuristically.
///
/// When `lenient` is set, structural errors are reported as warnings and a best-effort result is
/// returned.
pub fn parse_bytecode(
    buffer: &[u8],
    label_offsets: &[i32],
    entry_labels: &BTreeSet<Label>,
    format: Format,
    lenient: bool,
) -> Decoded {
    let mut parser = Parser {
        buffer,
        labels: LabelTable::new(label_offsets),
        arena: SegmentArena::new(),
        format,
        lenient,
        changed: false,
        problems: Vec::new(),
    };

    let entry = entry_labels
        .iter()
        .map(|&label| (label, SegmentType::Instructions))
        .collect();

    let ir = match parser.run(entry) {
        Ok(ir) => Some(ir),
        Err(e) => {
            let offset = match &e {
                ParseError::Decode(
                    DecodeError::Truncated(offset)
                    | DecodeError::UnterminatedString(offset)
                    | DecodeError::UnsupportedParam { offset, .. },
                ) => Some(*offset),
                ParseError::SizeMismatch { .. } => None,
            };
            parser.problem(
                Severity::Error,
                ProblemKind::StructuralError,
                e.to_string(),
                offset,
            );
            None
        }
    };

    Decoded {
        ir,
        problems: parser.problems,
    }
}

struct Parser<'b> {
    buffer: &'b [u8],
    labels: LabelTable,
    arena: SegmentArena,
    format: Format,
    lenient: bool,
    /// Set whenever a segment is created or reclassified during the current pass.
    changed: bool,
    problems: Vec<Problem>,
}

/// Instructions decoded up to the first failure.
struct DecodedRun {
    instructions: Vec<Instruction>,
    /// The failure, with the opcode of the failing instruction if it could be read.
    failure: Option<(Option<&'static Opcode>, DecodeError)>,
}

impl Parser<'_> {
    fn problem(
        &mut self,
        severity: Severity,
        kind: ProblemKind,
        message: String,
        offset: Option<usize>,
    ) {
        match severity {
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
        self.problems.push(Problem {
            severity,
            kind,
            message,
            offset,
        });
    }

    fn warn(&mut self, message: String, offset: Option<usize>) {
        self.problem(Severity::Warning, ProblemKind::DecodeWarning, message, offset);
    }

    fn run(&mut self, entry: BTreeMap<Label, SegmentType>) -> Result<BytecodeIr, ParseError> {
        self.find_and_parse_segments(entry)?;
        self.fill_gaps()?;
        self.attach_unreferenced_labels();

        let arena = std::mem::take(&mut self.arena);
        let ir = arena.into_ir();
        let actual = ir.size(self.format);
        if actual != self.buffer.len() {
            let error = ParseError::SizeMismatch {
                expected: self.buffer.len(),
                actual,
            };
            if !self.lenient {
                return Err(error);
            }
            self.problem(
                Severity::Warning,
                ProblemKind::StructuralError,
                error.to_string(),
                None,
            );
        }
        Ok(ir)
    }

    /// Fixed point: parse segments of known type, then look for label references in the
    /// instructions found so far, until a pass changes nothing.
    fn find_and_parse_segments(
        &mut self,
        mut pending: BTreeMap<Label, SegmentType>,
    ) -> Result<(), ParseError> {
        // Instruction segments whose label references have all been resolved.
        let mut analyzed: HashSet<SegmentId> = HashSet::new();
        let mut pass = 0;

        loop {
            pass += 1;
            self.changed = false;

            for (&label, &ty) in &pending {
                self.parse_segment_chain(label, ty)?;
            }

            pending = self.find_label_references(&mut analyzed);

            log::debug!(
                "pass {pass}: {} segments, {} label references",
                self.arena.len(),
                pending.len()
            );

            if !self.changed {
                return Ok(());
            }
        }
    }

    /// Parse the segment at `label` and every segment control drops through into from there.
    fn parse_segment_chain(&mut self, label: Label, ty: SegmentType) -> Result<(), ParseError> {
        let mut next = Some((label, ty));
        while let Some((label, ty)) = next {
            next = self
                .parse_segment(label, ty)?
                .map(|label| (label, SegmentType::Instructions));
        }
        Ok(())
    }

    /// Returns the label of the following segment when control drops through into it.
    fn parse_segment(&mut self, label: Label, ty: SegmentType) -> Result<Option<Label>, ParseError> {
        let Some(offset) = self.labels.offset(label) else {
            if !BUILTIN_FUNCTIONS.contains(&label) {
                self.warn(
                    format!("Label {label} is not registered in the label table."),
                    None,
                );
            }
            return Ok(None);
        };
        if offset >= self.buffer.len() {
            // Reported with the other dangling labels once all segments are known.
            return Ok(None);
        }

        let labels = match self.arena.at(offset) {
            None => vec![label],
            Some(id) => {
                let segment = self.arena.get_mut(id);
                segment.add_label(label);
                let old = segment.ty();
                if ty.priority() <= old.priority() {
                    return Ok(None);
                }
                let labels = segment.labels().to_vec();
                self.warn(
                    format!("Segment at offset {offset} reclassified from {old:?} to {ty:?}."),
                    Some(offset),
                );
                labels
            }
        };

        let next = self.labels.next_after(offset);
        let end = next.map_or(self.buffer.len(), |(_, o)| o.min(self.buffer.len()));

        match ty {
            SegmentType::Instructions => {
                let drops_through = self.parse_instructions_segment(offset, end, labels)?;
                Ok(next.filter(|_| drops_through).map(|(label, _)| label))
            }
            SegmentType::Data => {
                self.store(offset, self.data_segment(offset, end, labels));
                Ok(None)
            }
            SegmentType::String => {
                let segment = self.string_segment(offset, end, labels);
                self.store(offset, segment);
                Ok(None)
            }
        }
    }

    fn store(&mut self, offset: usize, segment: Segment) -> SegmentId {
        self.changed = true;
        match self.arena.at(offset) {
            Some(id) => {
                self.arena.replace(id, segment);
                id
            }
            None => self.arena.insert(offset, segment),
        }
    }

    /// Decode instructions in `[offset, end)`, stopping at the first failure.
    fn decode_instructions(&self, offset: usize, end: usize) -> DecodedRun {
        let bytes = &self.buffer[..end];
        let mut instructions = Vec::new();
        let mut pos = offset;

        while pos < end {
            let opcode = match decode_opcode(bytes, pos) {
                Ok(opcode) => opcode,
                Err(e) => {
                    return DecodedRun {
                        instructions,
                        failure: Some((None, e)),
                    };
                }
            };
            match decode_args(bytes, pos, opcode, self.format) {
                Ok((args, size)) => {
                    instructions.push(Instruction::new(opcode, args));
                    pos += size;
                }
                Err(e) => {
                    return DecodedRun {
                        instructions,
                        failure: Some((Some(opcode), e)),
                    };
                }
            }
        }

        DecodedRun {
            instructions,
            failure: None,
        }
    }

    /// Returns whether control can drop through into the next segment.
    fn parse_instructions_segment(
        &mut self,
        offset: usize,
        end: usize,
        labels: Vec<Label>,
    ) -> Result<bool, ParseError> {
        let DecodedRun {
            mut instructions,
            failure,
        } = self.decode_instructions(offset, end);

        if let Some((opcode, error)) = failure {
            if !self.lenient {
                return Err(error.into());
            }
            let at = match error {
                DecodeError::Truncated(o)
                | DecodeError::UnterminatedString(o)
                | DecodeError::UnsupportedParam { offset: o, .. } => o,
            };
            self.problem(
                Severity::Warning,
                ProblemKind::StructuralError,
                format!("Couldn't fully parse instruction segment: {error}."),
                Some(at),
            );
            match opcode {
                Some(opcode) => instructions.push(Instruction::stub(opcode)),
                None if instructions.is_empty() => {
                    // Nothing decodable at all, keep the bytes as they are.
                    self.store(offset, self.data_segment(offset, end, labels));
                    return Ok(false);
                }
                None => {}
            }
        }

        self.check_string_args(offset, &instructions);

        let drops_through = !instructions
            .iter()
            .any(|i| matches!(i.opcode.code, code::RET | code::JMP));
        self.store(
            offset,
            Segment::Instructions(InstructionSegment {
                labels,
                instructions,
            }),
        );
        Ok(drops_through)
    }

    /// Unpaired UTF-16 surrogates decode to U+FFFD, so those strings won't be written back as
    /// they were read.
    fn check_string_args(&mut self, offset: usize, instructions: &[Instruction]) {
        let buffer = self.buffer;
        let mut pos = offset;
        let mut encoded = Vec::new();

        for insn in instructions {
            let size = insn.size(self.format);
            if insn.valid && insn.args.iter().any(|a| matches!(a, Arg::Str(_))) {
                encoded.clear();
                let exact = encode(insn.opcode, &insn.args, self.format, &mut encoded).is_ok()
                    && buffer.get(pos..pos + size) == Some(encoded.as_slice());
                if !exact {
                    self.warn(
                        format!(
                            "String argument of {} at offset {pos} has characters that can't be decoded.",
                            insn.opcode.mnemonic
                        ),
                        Some(pos),
                    );
                }
            }
            pos += size;
        }
    }

    fn data_segment(&self, offset: usize, end: usize, labels: Vec<Label>) -> Segment {
        Segment::Data(DataSegment {
            labels,
            data: self.buffer[offset..end].to_vec(),
        })
    }

    fn string_segment(&mut self, offset: usize, end: usize, labels: Vec<Label>) -> Segment {
        let buffer = self.buffer;
        let region = &buffer[offset..end];
        let (value, terminated) = self.format.decode_string(region);

        let mut content = self.format.string_arg_size(&value);
        if !terminated {
            content -= self.format.string_arg_size("");
        }
        let mut encoded = Vec::with_capacity(content);
        self.format.encode_string(&value, content, &mut encoded);
        if encoded != region[..content] {
            self.warn(
                format!("String segment at offset {offset} has characters that can't be decoded."),
                Some(offset),
            );
        }

        if !terminated {
            self.warn(
                format!("String segment at offset {offset} isn't null terminated."),
                Some(offset),
            );
        } else if region.get(content..).is_some_and(|pad| pad.iter().any(|&b| b != 0)) {
            self.warn(
                format!("String segment at offset {offset} has non-zero padding."),
                Some(offset),
            );
        }

        let size = (region.len() != self.format.string_segment_size(&value)).then_some(region.len());
        Segment::String(StringSegment {
            labels,
            value,
            size,
        })
    }

    /// Scan instruction segments for label references, resolving stack and register operands
    /// through data flow analysis.
    fn find_label_references(
        &self,
        analyzed: &mut HashSet<SegmentId>,
    ) -> BTreeMap<Label, SegmentType> {
        let (ids, segments): (Vec<SegmentId>, Vec<&InstructionSegment>) = self
            .arena
            .iter()
            .filter_map(|(_, id, s)| s.as_instructions().map(|s| (id, s)))
            .unzip();
        let cfg = ControlFlowGraph::build(segments.iter().copied());
        let mut found = BTreeMap::new();

        for (seg_idx, (&id, segment)) in ids.iter().zip(&segments).enumerate() {
            if analyzed.contains(&id) {
                continue;
            }
            let mut resolved_all = true;

            for (index, insn) in segment.instructions.iter().enumerate() {
                let at = InsnRef {
                    segment: seg_idx,
                    index,
                };
                for (param_idx, param) in insn.opcode.params.iter().enumerate() {
                    let ty = match param.ty {
                        ParamType::ILabel => SegmentType::Instructions,
                        ParamType::DLabel => SegmentType::Data,
                        ParamType::SLabel => SegmentType::String,
                        ParamType::ILabelVar => {
                            for value in insn.param_args(param_idx).iter().filter_map(|a| a.as_int())
                            {
                                merge(&mut found, value, SegmentType::Instructions);
                            }
                            continue;
                        }
                        ParamType::RegTupRef(registers) => {
                            let base = insn.param_args(param_idx).first().and_then(|a| a.as_int());
                            for (j, reg) in registers.iter().enumerate() {
                                if reg.ty != ParamType::ILabel {
                                    continue;
                                }
                                let register =
                                    base.and_then(|b| u8::try_from(b as i64 + j as i64).ok());
                                let values = register.map(|r| get_register_value(&cfg, at, r));
                                resolved_all &= merge_candidates(
                                    &mut found,
                                    values,
                                    SegmentType::Instructions,
                                );
                            }
                            continue;
                        }
                        _ => continue,
                    };

                    if insn.opcode.is_pop() {
                        let depth = insn.opcode.params.len() - param_idx - 1;
                        let values = get_stack_value(&cfg, at, depth);
                        resolved_all &= merge_candidates(&mut found, Some(values), ty);
                    } else if let Some(value) = insn.int_arg(param_idx) {
                        merge(&mut found, value, ty);
                    }
                }
            }

            if resolved_all {
                analyzed.insert(id);
            }
        }

        found
    }

    /// Give every byte range no label reference reached a segment of its own.
    fn fill_gaps(&mut self) -> Result<(), ParseError> {
        if self.arena.is_empty() && !self.buffer.is_empty() {
            log::debug!("nothing reachable from the entry labels, classifying by heuristics");
        }
        let mut offset = 0;

        while offset < self.buffer.len() {
            let id = match self.arena.at(offset) {
                Some(id) => id,
                None => self.fill_gap(offset),
            };
            let size = self.arena.get(id).size(self.format);
            if size == 0 {
                return Err(ParseError::SizeMismatch {
                    expected: self.buffer.len(),
                    actual: offset,
                });
            }
            offset += size;
        }

        Ok(())
    }

    fn fill_gap(&mut self, offset: usize) -> SegmentId {
        let labels = self.labels.labels_at(offset).to_vec();
        let end = self
            .labels
            .next_after(offset)
            .map_or(self.buffer.len(), |(_, o)| o.min(self.buffer.len()));

        let run = self.decode_instructions(offset, end);
        let segment = match run.failure {
            None if self.looks_like_code(offset, &run.instructions) => {
                Segment::Instructions(InstructionSegment {
                    labels,
                    instructions: run.instructions,
                })
            }
            Some((_, e)) => {
                log::trace!("gap at offset {offset} is not an instruction segment: {e}");
                self.data_segment(offset, end, labels)
            }
            None => self.data_segment(offset, end, labels),
        };
        self.store(offset, segment)
    }

    /// Heuristics telling decodable data apart from actual code.
    fn looks_like_code(&self, offset: usize, instructions: &[Instruction]) -> bool {
        let reject = |reason: String| {
            log::trace!("gap at offset {offset} is not an instruction segment: {reason}");
            false
        };

        let mut total_nops = 0;
        let mut sequential_nops = 0;
        let mut unknown_opcodes = 0;
        let mut pops = 0;
        let mut pops_without_push = 0;
        let mut label_refs = 0;
        let mut unknown_labels = 0;
        let mut prev: Option<&Opcode> = None;

        for insn in instructions {
            if insn.opcode.code == code::NOP {
                total_nops += 1;
                sequential_nops += 1;
                if total_nops > MAX_TOTAL_NOPS {
                    return reject(format!("more than {MAX_TOTAL_NOPS} nops"));
                }
                if sequential_nops > MAX_SEQUENTIAL_NOPS {
                    return reject(format!("more than {MAX_SEQUENTIAL_NOPS} sequential nops"));
                }
            } else {
                sequential_nops = 0;
            }

            if !insn.opcode.known {
                unknown_opcodes += 1;
            }

            if insn.opcode.is_pop() {
                pops += 1;
                if !prev.is_some_and(Opcode::is_push) {
                    pops_without_push += 1;
                }
            }

            for (index, param) in insn.opcode.params.iter().enumerate() {
                if !param.ty.is_label() {
                    continue;
                }
                for arg in insn.param_args(index) {
                    label_refs += 1;
                    let known = arg
                        .as_int()
                        .and_then(|v| Label::try_from(v).ok())
                        .is_some_and(|l| self.labels.has_label(l));
                    if !known {
                        unknown_labels += 1;
                    }
                }
            }

            prev = Some(insn.opcode);
        }

        let ratio = |count: usize, total: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            }
        };

        let unknown_label_ratio = ratio(unknown_labels, label_refs);
        if unknown_label_ratio > MAX_UNKNOWN_LABEL_RATIO {
            return reject(format!(
                "{:.0}% of its label references are to nonexistent labels",
                100.0 * unknown_label_ratio
            ));
        }
        let pop_ratio = ratio(pops_without_push, pops);
        if pop_ratio > MAX_POP_WITHOUT_PUSH_RATIO {
            return reject(format!(
                "{:.0}% of its stack pops have no preceding push",
                100.0 * pop_ratio
            ));
        }
        let unknown_opcode_ratio = ratio(unknown_opcodes, instructions.len());
        if unknown_opcode_ratio > MAX_UNKNOWN_OPCODE_RATIO {
            return reject(format!(
                "{:.0}% of its opcodes are unknown",
                100.0 * unknown_opcode_ratio
            ));
        }

        true
    }

    /// Add labels no instruction referenced to the segment they point at.
    fn attach_unreferenced_labels(&mut self) {
        let labels: Vec<(Label, usize)> = self.labels.iter().collect();
        for (label, offset) in labels {
            match self.arena.at(offset) {
                Some(id) => {
                    self.arena.get_mut(id).add_label(label);
                }
                None => self.warn(
                    format!("Label {label} doesn't point to anything."),
                    Some(offset),
                ),
            }
        }
    }
}

/// Record `value` as a label of type `ty`, unless it's already known with a higher priority.
fn merge(found: &mut BTreeMap<Label, SegmentType>, value: i32, ty: SegmentType) {
    let Ok(label) = Label::try_from(value) else {
        return;
    };
    found
        .entry(label)
        .and_modify(|old| {
            if ty.priority() > old.priority() {
                *old = ty;
            }
        })
        .or_insert(ty);
}

/// Merge analysis results. Returns false if the candidates were unknown or too many.
fn merge_candidates(
    found: &mut BTreeMap<Label, SegmentType>,
    values: Option<ValueSet>,
    ty: SegmentType,
) -> bool {
    match values {
        Some(values) if values.len() <= MAX_LABEL_CANDIDATES => {
            for value in values.iter() {
                merge(found, value, ty);
            }
            true
        }
        _ => false,
    }
}
