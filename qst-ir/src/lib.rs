//! Intermediate representation of quest script bytecode.
//!
//! Bytecode is modelled as an ordered list of typed segments. On top of the instruction
//! segments this crate builds a control flow graph and answers best-effort questions about the
//! values registers and stack slots can hold at a given instruction.

pub mod cfg;
pub mod data_flow;
pub mod instruction;
pub mod segment;
pub mod value_set;

pub use cfg::{BasicBlock, BlockId, BranchType, ControlFlowGraph, InsnRef};
pub use data_flow::{get_register_value, get_stack_value};
pub use instruction::Instruction;
pub use segment::{
    BytecodeIr, DataSegment, InstructionSegment, Label, Segment, SegmentArena, SegmentId,
    SegmentType, StringSegment,
};
pub use value_set::ValueSet;
