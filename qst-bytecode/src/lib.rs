//! Conversion between raw quest script bytecode and its segment IR.
//!
//! [`parse_bytecode`] recovers which byte ranges hold instructions, strings and data, given
//! nothing but the label table of the script. [`write_bytecode`] is its inverse.

mod labels;
mod parse;
mod problem;
mod write;

pub use labels::LabelTable;
pub use parse::{BUILTIN_FUNCTIONS, Decoded, parse_bytecode};
pub use problem::{Problem, ProblemKind, Severity};
pub use write::{WriteError, write_bytecode};
