use crate::{Arg, Format, Opcode, ParamType, lookup};

/// Longest string operand, in bytes, that will be scanned for a terminator.
const MAX_STRING_SCAN: usize = 4096;

/// Errors from [`decode_opcode`] and [`decode_args`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Instruction at the given byte offset runs past the end of its segment.
    #[error("truncated instruction at offset {0}")]
    Truncated(usize),
    /// String operand of the instruction at the given offset has no null terminator.
    #[error("unterminated string argument in instruction at offset {0}")]
    UnterminatedString(usize),
    /// The opcode has a parameter type without an inline encoding.
    #[error("{mnemonic} at offset {offset} has a parameter that can't be decoded")]
    UnsupportedParam {
        mnemonic: &'static str,
        offset: usize,
    },
}

/// Decode the opcode at `offset`.
///
/// `bytes` must end where the enclosing segment ends; nothing past its end is read.
pub fn decode_opcode(bytes: &[u8], offset: usize) -> Result<&'static Opcode, DecodeError> {
    let first = *bytes.get(offset).ok_or(DecodeError::Truncated(offset))?;
    let code = match first {
        0xF8 | 0xF9 => {
            let second = *bytes.get(offset + 1).ok_or(DecodeError::Truncated(offset))?;
            u16::from_be_bytes([first, second])
        }
        _ => first as u16,
    };
    // Every 1-byte code and every code of the two escape pages has a table entry.
    lookup(code).ok_or(DecodeError::Truncated(offset))
}

/// Decode the inline arguments of `opcode`, the instruction starting at `offset`.
///
/// Returns the arguments and the total instruction size. `Pop` opcodes have no inline
/// arguments.
pub fn decode_args(
    bytes: &[u8],
    offset: usize,
    opcode: &Opcode,
    format: Format,
) -> Result<(Vec<Arg>, usize), DecodeError> {
    let mut r = Reader {
        bytes,
        pos: offset + opcode.size(),
        insn: offset,
    };
    let mut args = Vec::new();

    if opcode.is_pop() {
        return Ok((args, r.pos - offset));
    }

    for param in opcode.params {
        match param.ty {
            ParamType::Byte | ParamType::RegRef | ParamType::RegTupRef(_) => {
                args.push(Arg::Int(r.u8()? as i32));
            }
            ParamType::Word => args.push(Arg::Int(r.u16()? as i32)),
            ParamType::DWord => args.push(Arg::Int(r.i32()?)),
            ParamType::Float => args.push(Arg::Float(f32::from_bits(r.i32()? as u32))),
            ParamType::Label | ParamType::ILabel | ParamType::DLabel | ParamType::SLabel => {
                args.push(Arg::Int(r.label(format)?));
            }
            ParamType::ILabelVar => {
                let count = r.u8()?;
                for _ in 0..count {
                    args.push(Arg::Int(r.label(format)?));
                }
            }
            ParamType::RegRefVar => {
                let count = r.u8()?;
                for _ in 0..count {
                    args.push(Arg::Int(r.u8()? as i32));
                }
            }
            ParamType::String => args.push(Arg::Str(r.string(format)?)),
            ParamType::Any | ParamType::Pointer => {
                return Err(DecodeError::UnsupportedParam {
                    mnemonic: opcode.mnemonic,
                    offset,
                });
            }
        }
    }

    Ok((args, r.pos - offset))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Start of the instruction being decoded, reported in errors.
    insn: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated(self.insn))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn label(&mut self, format: Format) -> Result<i32, DecodeError> {
        let b = self.take(format.label_width())?;
        Ok(b.iter().rev().fold(0i32, |acc, &byte| (acc << 8) | byte as i32))
    }

    fn string(&mut self, format: Format) -> Result<String, DecodeError> {
        let rest = self
            .bytes
            .get(self.pos..)
            .ok_or(DecodeError::Truncated(self.insn))?;
        let window = &rest[..rest.len().min(MAX_STRING_SCAN)];
        let (value, terminated) = format.decode_string(window);
        if !terminated {
            return Err(DecodeError::UnterminatedString(self.insn));
        }
        self.pos += format.string_arg_size(&value);
        Ok(value)
    }
}
