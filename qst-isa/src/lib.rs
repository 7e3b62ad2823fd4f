//! Quest script ISA definitions, generated from `isa.yaml`.
//!
//! This crate provides the opcode table of the quest script virtual machine, its parameter
//! types, and the per-format operand codec used to read and write bytecode.

mod decoder;
mod emitter;
mod format;
mod opcode;
mod operand;

pub use decoder::{DecodeError, decode_args, decode_opcode};
pub use emitter::{EncodeError, encode, encode_opcode, encoded_size};
pub use format::{Format, StringEncoding};
pub use opcode::{Access, Opcode, OpcodeFlags, Param, ParamType, StackInteraction};
pub use operand::Arg;

include!(concat!(env!("OUT_DIR"), "/generated.rs"));

/// Look up an opcode by its numeric code.
///
/// Returns `None` only for codes outside the three opcode pages (0x00xx, 0xF8xx, 0xF9xx). Codes
/// without a known opcode resolve to an `unknown_<code>` placeholder.
pub fn lookup(code: u16) -> Option<&'static Opcode> {
    let page = match code >> 8 {
        0x00 => 0,
        0xF8 => 1,
        0xF9 => 2,
        _ => return None,
    };
    Some(OPCODES[page * 256 + (code & 0xFF) as usize])
}

/// All 768 table entries, placeholders included, in code order.
pub fn opcode_table() -> impl Iterator<Item = &'static Opcode> {
    OPCODES.iter().copied()
}

fn unknown_by_mnemonic(mnemonic: &str) -> Option<&'static Opcode> {
    let hex = mnemonic.strip_prefix("unknown_")?;
    let valid = match hex.len() {
        2 => true,
        4 => hex.starts_with("f8") || hex.starts_with("f9"),
        _ => false,
    };
    if !valid || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    let code = u16::from_str_radix(hex, 16).ok()?;
    lookup(code)
}
