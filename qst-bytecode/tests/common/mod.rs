#![allow(dead_code)]

use std::collections::BTreeSet;

use qst_bytecode::{Decoded, parse_bytecode};
use qst_ir::{Label, Segment, SegmentType};
use qst_isa::{Arg, Format, by_mnemonic, encode};

/// Assembles test scripts byte by byte while recording label offsets.
pub struct Script {
    pub format: Format,
    pub bytes: Vec<u8>,
    pub label_offsets: Vec<i32>,
}

impl Script {
    pub fn new(format: Format) -> Self {
        Script {
            format,
            bytes: Vec::new(),
            label_offsets: Vec::new(),
        }
    }

    /// Point `label` at the current end of the script.
    pub fn label(&mut self, label: Label) -> &mut Self {
        self.label_at(label, self.bytes.len() as i32)
    }

    pub fn label_at(&mut self, label: Label, offset: i32) -> &mut Self {
        let index = label as usize;
        if self.label_offsets.len() <= index {
            self.label_offsets.resize(index + 1, -1);
        }
        self.label_offsets[index] = offset;
        self
    }

    pub fn op(&mut self, mnemonic: &str, args: &[i32]) -> &mut Self {
        let args: Vec<Arg> = args.iter().map(|&v| Arg::Int(v)).collect();
        self.op_args(mnemonic, &args)
    }

    pub fn op_args(&mut self, mnemonic: &str, args: &[Arg]) -> &mut Self {
        let opcode = by_mnemonic(mnemonic).unwrap_or_else(|| panic!("unknown opcode {mnemonic}"));
        encode(opcode, args, self.format, &mut self.bytes).unwrap();
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Null-terminated string padded to `size` bytes.
    pub fn string(&mut self, s: &str, size: usize) -> &mut Self {
        self.format.encode_string(s, size, &mut self.bytes);
        self
    }

    pub fn parse(&self, entry: &[Label], lenient: bool) -> Decoded {
        let entry: BTreeSet<Label> = entry.iter().copied().collect();
        parse_bytecode(&self.bytes, &self.label_offsets, &entry, self.format, lenient)
    }
}

/// Type and labels of every segment, in order.
pub fn layout(segments: &[Segment]) -> Vec<(SegmentType, Vec<Label>)> {
    segments
        .iter()
        .map(|s| (s.ty(), s.labels().to_vec()))
        .collect()
}

pub fn mnemonics(segment: &Segment) -> Vec<&'static str> {
    segment
        .as_instructions()
        .map(|s| s.instructions.iter().map(|i| i.opcode.mnemonic).collect())
        .unwrap_or_default()
}
