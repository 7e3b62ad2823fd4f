//! Text form of quest script bytecode.
//!
//! [`disassemble`] renders a [`BytecodeIr`](qst_ir::BytecodeIr) as assembly lines and
//! [`assemble`] reads them back. With inline stack arguments, the pushes feeding a stack
//! consuming instruction are written as that instruction's operands, e.g.
//! `set_floor_handler 1, 150` instead of `arg_pushl 1`, `arg_pushw 150`, `set_floor_handler`.

mod assembler;
mod disassembler;
pub mod tokenizer;

pub use assembler::{Assembled, AssemblyProblem, assemble};
pub use disassembler::disassemble;
