use crate::{Arg, Format, Opcode, ParamType};

/// Errors from [`encode`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// No argument was supplied for a parameter.
    #[error("{mnemonic}: missing argument for parameter {index}")]
    MissingArg { mnemonic: &'static str, index: usize },
    /// The argument's kind doesn't fit the parameter type.
    #[error("{mnemonic}: argument {index} is not {expected}")]
    ArgType {
        mnemonic: &'static str,
        index: usize,
        expected: &'static str,
    },
    /// More than 255 elements were supplied for a vararg parameter.
    #[error("{mnemonic}: {count} vararg elements exceed the 255 element limit")]
    TooManyElements { mnemonic: &'static str, count: usize },
    /// The opcode has a parameter type without an inline encoding.
    #[error("{mnemonic} has a parameter that can't be encoded")]
    UnsupportedParam { mnemonic: &'static str },
}

/// Append the encoding of one instruction to `out`.
///
/// Two-byte codes are written high byte first, operands little endian. `Pop` opcodes are written
/// without operands regardless of `args`.
pub fn encode(
    opcode: &Opcode,
    args: &[Arg],
    format: Format,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    encode_opcode(opcode, out);

    if opcode.is_pop() {
        return Ok(());
    }

    for (index, param) in opcode.params.iter().enumerate() {
        let param_args = opcode.param_args(args, index);
        let int = |i: usize| -> Result<i32, EncodeError> {
            let arg = param_args.get(i).ok_or(EncodeError::MissingArg {
                mnemonic: opcode.mnemonic,
                index,
            })?;
            arg.as_int().ok_or(EncodeError::ArgType {
                mnemonic: opcode.mnemonic,
                index,
                expected: param.ty.describe(),
            })
        };

        match param.ty {
            ParamType::Byte | ParamType::RegRef | ParamType::RegTupRef(_) => {
                out.push(int(0)? as u8);
            }
            ParamType::Word => out.extend_from_slice(&(int(0)? as u16).to_le_bytes()),
            ParamType::DWord => out.extend_from_slice(&int(0)?.to_le_bytes()),
            ParamType::Float => {
                let value = param_args
                    .first()
                    .ok_or(EncodeError::MissingArg {
                        mnemonic: opcode.mnemonic,
                        index,
                    })?
                    .as_float()
                    .ok_or(EncodeError::ArgType {
                        mnemonic: opcode.mnemonic,
                        index,
                        expected: param.ty.describe(),
                    })?;
                out.extend_from_slice(&value.to_le_bytes());
            }
            ParamType::Label | ParamType::ILabel | ParamType::DLabel | ParamType::SLabel => {
                write_label(int(0)?, format, out);
            }
            ParamType::ILabelVar | ParamType::RegRefVar => {
                let count = u8::try_from(param_args.len()).map_err(|_| {
                    EncodeError::TooManyElements {
                        mnemonic: opcode.mnemonic,
                        count: param_args.len(),
                    }
                })?;
                out.push(count);
                for i in 0..param_args.len() {
                    if param.ty == ParamType::ILabelVar {
                        write_label(int(i)?, format, out);
                    } else {
                        out.push(int(i)? as u8);
                    }
                }
            }
            ParamType::String => {
                let s = param_args
                    .first()
                    .ok_or(EncodeError::MissingArg {
                        mnemonic: opcode.mnemonic,
                        index,
                    })?
                    .as_str()
                    .ok_or(EncodeError::ArgType {
                        mnemonic: opcode.mnemonic,
                        index,
                        expected: param.ty.describe(),
                    })?;
                format.encode_string(s, format.string_arg_size(s), out);
            }
            ParamType::Any | ParamType::Pointer => {
                return Err(EncodeError::UnsupportedParam {
                    mnemonic: opcode.mnemonic,
                });
            }
        }
    }

    Ok(())
}

/// Encoded size of an instruction, the sum of the opcode size and all inline argument sizes.
pub fn encoded_size(opcode: &Opcode, args: &[Arg], format: Format) -> usize {
    let mut size = opcode.size();

    if opcode.is_pop() {
        return size;
    }

    for (index, param) in opcode.params.iter().enumerate() {
        let param_args = opcode.param_args(args, index);
        if param.ty.is_vararg() {
            size += 1;
            size += param_args
                .iter()
                .map(|a| a.encoded_size(&param.ty, format))
                .sum::<usize>();
        } else {
            size += param_args
                .first()
                .unwrap_or(&Arg::Int(0))
                .encoded_size(&param.ty, format);
        }
    }

    size
}

/// Append only the opcode bytes, high byte first for two-byte codes.
pub fn encode_opcode(opcode: &Opcode, out: &mut Vec<u8>) {
    if opcode.size() == 2 {
        out.push((opcode.code >> 8) as u8);
    }
    out.push(opcode.code as u8);
}

fn write_label(value: i32, format: Format, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes()[..format.label_width()]);
}
