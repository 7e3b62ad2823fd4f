use qst_ir::{BytecodeIr, Segment};
use qst_isa::{EncodeError, Format, encode, encode_opcode};

/// Errors from [`write_bytecode`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("segment {segment}, instruction {instruction}: {source}")]
    Encode {
        segment: usize,
        instruction: usize,
        #[source]
        source: EncodeError,
    },
    /// Label numbers are stored as 16-bit operands.
    #[error("label {0} doesn't fit in a label operand")]
    LabelOutOfRange(u32),
    #[error("segment {0} starts at offset {1}, past the 32-bit label table range")]
    OffsetOutOfRange(usize, usize),
}

/// Encode `ir` back into bytecode.
///
/// Returns the bytes and the label table: the offset of every label, indexed by label, -1 for
/// labels no segment carries.
pub fn write_bytecode(ir: &BytecodeIr, format: Format) -> Result<(Vec<u8>, Vec<i32>), WriteError> {
    let mut out = Vec::with_capacity(ir.size(format));
    let table_len = ir.max_label().map_or(0, |max| max as usize + 1);
    let mut label_offsets = vec![-1; table_len];

    for (seg_idx, segment) in ir.segments.iter().enumerate() {
        let offset = i32::try_from(out.len())
            .map_err(|_| WriteError::OffsetOutOfRange(seg_idx, out.len()))?;
        for &label in segment.labels() {
            if label > u16::MAX as u32 {
                return Err(WriteError::LabelOutOfRange(label));
            }
            label_offsets[label as usize] = offset;
        }

        match segment {
            Segment::Instructions(s) => {
                for (i, insn) in s.instructions.iter().enumerate() {
                    if !insn.valid {
                        encode_opcode(insn.opcode, &mut out);
                        continue;
                    }
                    encode(insn.opcode, &insn.args, format, &mut out).map_err(|source| {
                        WriteError::Encode {
                            segment: seg_idx,
                            instruction: i,
                            source,
                        }
                    })?;
                }
            }
            Segment::String(s) => format.encode_string(&s.value, s.size(format), &mut out),
            Segment::Data(s) => out.extend_from_slice(&s.data),
        }
    }

    Ok((out, label_offsets))
}
