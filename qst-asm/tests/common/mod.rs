#![allow(dead_code)]

use std::collections::BTreeSet;

use qst_bytecode::parse_bytecode;
use qst_ir::{BytecodeIr, Instruction, Label, Segment};
use qst_isa::{Arg, Format, by_mnemonic, encode};

pub fn opcode(mnemonic: &str) -> &'static qst_isa::Opcode {
    by_mnemonic(mnemonic).unwrap_or_else(|| panic!("unknown opcode {mnemonic}"))
}

pub fn insn(mnemonic: &str, args: &[i32]) -> Instruction {
    Instruction::new(opcode(mnemonic), args.iter().map(|&v| Arg::Int(v)).collect())
}

pub fn insn_args(mnemonic: &str, args: Vec<Arg>) -> Instruction {
    Instruction::new(opcode(mnemonic), args)
}

/// Split a text block into lines, keeping empty ones.
pub fn text(s: &str) -> Vec<String> {
    s.split('\n').map(str::to_string).collect()
}

pub fn mnemonics(segment: &Segment) -> Vec<&'static str> {
    segment
        .as_instructions()
        .map(|s| s.instructions.iter().map(|i| i.opcode.mnemonic).collect())
        .unwrap_or_default()
}

/// Encodes instructions and raw regions while recording label offsets, then decodes the result
/// the way real scripts are loaded.
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

    pub fn label(&mut self, label: Label) -> &mut Self {
        let index = label as usize;
        if self.label_offsets.len() <= index {
            self.label_offsets.resize(index + 1, -1);
        }
        self.label_offsets[index] = self.bytes.len() as i32;
        self
    }

    pub fn op(&mut self, mnemonic: &str, args: &[i32]) -> &mut Self {
        let args: Vec<Arg> = args.iter().map(|&v| Arg::Int(v)).collect();
        self.op_args(mnemonic, &args)
    }

    pub fn op_args(&mut self, mnemonic: &str, args: &[Arg]) -> &mut Self {
        encode(opcode(mnemonic), args, self.format, &mut self.bytes).unwrap();
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// String segment with the canonical padding.
    pub fn string(&mut self, s: &str) -> &mut Self {
        let size = self.format.string_segment_size(s);
        self.format.encode_string(s, size, &mut self.bytes);
        self
    }

    pub fn decode(&self, entry: &[Label]) -> BytecodeIr {
        let entry: BTreeSet<Label> = entry.iter().copied().collect();
        let decoded = parse_bytecode(&self.bytes, &self.label_offsets, &entry, self.format, false);
        assert!(!decoded.has_errors(), "decoding failed: {:?}", decoded.problems);
        decoded.ir.unwrap()
    }
}
