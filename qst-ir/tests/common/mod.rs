#![allow(dead_code)]

use qst_ir::{Instruction, InstructionSegment, Label};
use qst_isa::{Arg, by_mnemonic};

/// Instruction with integer arguments.
pub fn insn(mnemonic: &str, args: &[i32]) -> Instruction {
    let opcode = by_mnemonic(mnemonic).unwrap_or_else(|| panic!("unknown opcode {mnemonic}"));
    Instruction::new(opcode, args.iter().map(|&v| Arg::Int(v)).collect())
}

pub fn segment(labels: &[Label], instructions: Vec<Instruction>) -> InstructionSegment {
    InstructionSegment {
        labels: labels.to_vec(),
        instructions,
    }
}
