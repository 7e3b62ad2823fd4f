use std::fmt::Write;

use qst_ir::{BytecodeIr, Instruction, Segment, SegmentType};
use qst_isa::{Arg, Opcode, Param, ParamType, code};

use crate::assembler::stack_param;

const BYTES_PER_LINE: usize = 16;

/// Render `ir` as assembly text, one string per line.
///
/// With `inline_stack_args`, pushes that feed a stack consuming instruction are folded back into
/// its operand list wherever [`crate::assemble`] would lower that operand list to exactly the
/// same pushes. Everything else is written out as is.
pub fn disassemble(ir: &BytecodeIr, inline_stack_args: bool) -> Vec<String> {
    log::trace!("disassembling {} segments", ir.segments.len());

    let mut lines = Vec::new();
    let mut section = None;

    for segment in &ir.segments {
        let ty = segment.ty();
        if section != Some(ty) {
            section = Some(ty);
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(
                match ty {
                    SegmentType::Instructions => ".code",
                    SegmentType::Data => ".data",
                    SegmentType::String => ".string",
                }
                .to_string(),
            );
            lines.push(String::new());
        }

        for label in segment.labels() {
            lines.push(format!("{label}:"));
        }

        match segment {
            Segment::Instructions(s) => {
                let mut emitter = InstructionEmitter {
                    lines: &mut lines,
                    inline_stack_args,
                    pushes: Vec::new(),
                    in_va_list: false,
                };
                for insn in &s.instructions {
                    emitter.instruction(insn);
                }
                emitter.flush();
            }
            Segment::Data(s) => {
                for chunk in s.data.chunks(BYTES_PER_LINE) {
                    let mut line = String::from("   ");
                    for byte in chunk {
                        let _ = write!(line, " 0x{byte:02X}");
                    }
                    lines.push(line);
                }
            }
            Segment::String(s) => lines.push(format!("    {}", quote_segment(&s.value))),
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }

    log::trace!("disassembled into {} lines", lines.len());
    lines
}

struct InstructionEmitter<'l, 'i> {
    lines: &'l mut Vec<String>,
    inline_stack_args: bool,
    /// Pushes not yet written, the candidates for folding into the next consumer.
    pushes: Vec<&'i Instruction>,
    in_va_list: bool,
}

impl<'i> InstructionEmitter<'_, 'i> {
    fn instruction(&mut self, insn: &'i Instruction) {
        match insn.opcode.code {
            code::VA_START => {
                self.flush();
                self.in_va_list = true;
            }
            code::VA_END => self.in_va_list = false,
            _ => {}
        }

        if !self.inline_stack_args || self.in_va_list {
            self.line(insn.opcode, &render_args(insn));
            return;
        }

        if insn.opcode.is_push() {
            self.pushes.push(insn);
            return;
        }

        if insn.opcode.is_pop() && insn.valid {
            self.consumer(insn);
        } else {
            self.flush();
            self.line(insn.opcode, &render_args(insn));
        }
    }

    /// Writes a stack consumer, folding the trailing pushes into its operands when every one of
    /// them is what the assembler would produce for the matching parameter.
    fn consumer(&mut self, insn: &Instruction) {
        let opcode = insn.opcode;
        let count = if opcode.has_varargs() {
            self.pushes.len()
        } else {
            opcode.params.len()
        };
        let fixed = opcode.params.len() - usize::from(opcode.has_varargs());

        let start = self.pushes.len().checked_sub(count);
        let operands = start.filter(|_| count >= fixed).and_then(|start| {
            self.pushes[start..]
                .iter()
                .enumerate()
                .map(|(i, push)| raise(stack_param(opcode, i)?, push))
                .collect::<Option<Vec<_>>>()
        });

        match (start, operands) {
            (Some(start), Some(operands)) => {
                log::trace!("raised {} stack operands into {opcode}", operands.len());
                self.pushes.truncate(start);
                self.flush();
                self.line(opcode, &operands);
            }
            _ => {
                self.flush();
                self.line(opcode, &[]);
            }
        }
    }

    fn flush(&mut self) {
        for push in std::mem::take(&mut self.pushes) {
            self.line(push.opcode, &render_args(push));
        }
    }

    fn line(&mut self, opcode: &Opcode, operands: &[String]) {
        if operands.is_empty() {
            self.lines.push(format!("    {}", opcode.mnemonic));
        } else {
            self.lines
                .push(format!("    {} {}", opcode.mnemonic, operands.join(", ")));
        }
    }
}

/// Operand text for `push` when passed to `param`, if the assembler lowers that text back to
/// the same push.
fn raise(param: &Param, push: &Instruction) -> Option<String> {
    if !push.valid {
        return None;
    }
    let arg = push.args.first()?;
    let value = arg.as_int();

    match (push.opcode.code, param.ty) {
        (code::ARG_PUSHB, ParamType::RegTupRef(_) | ParamType::RegRefVar) => {
            Some(format!("r{}", value?))
        }
        (code::ARG_PUSHR, ParamType::RegTupRef(_) | ParamType::RegRefVar) => None,
        (code::ARG_PUSHR, _) => Some(format!("r{}", value?)),
        (code::ARG_PUSHB, ParamType::Byte | ParamType::RegRef) => Some(value?.to_string()),
        (
            code::ARG_PUSHW,
            ParamType::Word
            | ParamType::Label
            | ParamType::ILabel
            | ParamType::DLabel
            | ParamType::SLabel
            | ParamType::ILabelVar,
        ) => Some(value?.to_string()),
        (code::ARG_PUSHL, ParamType::DWord) => Some(value?.to_string()),
        (code::ARG_PUSHL, ParamType::Float) => Some(float_text(f32::from_bits(value? as u32))),
        (code::ARG_PUSHS, ParamType::String) => Some(quote(arg.as_str()?)),
        _ => None,
    }
}

/// Inline operands of `insn`, registers written as `rN`.
fn render_args(insn: &Instruction) -> Vec<String> {
    let mut operands = Vec::with_capacity(insn.args.len());

    for (index, param) in insn.opcode.params.iter().enumerate() {
        for arg in insn.param_args(index) {
            operands.push(render_arg(param, arg));
        }
    }
    // Arguments past the parameter list only show up in hand-built IR.
    for arg in insn.args.iter().skip(operands.len()) {
        operands.push(arg.to_string());
    }

    operands
}

fn render_arg(param: &Param, arg: &Arg) -> String {
    match arg {
        Arg::Int(v) if param.ty.is_register() => format!("r{v}"),
        Arg::Int(v) => v.to_string(),
        Arg::Float(v) => float_text(*v),
        Arg::Str(s) => quote(s),
    }
}

/// Shortest text that reads back as exactly `v`. NaN payloads are kept as bits.
fn float_text(v: f32) -> String {
    if v.is_nan() {
        if v.to_bits() == f32::NAN.to_bits() {
            "nan".to_string()
        } else {
            format!("nan(0x{:08x})", v.to_bits())
        }
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{v:?}")
    }
}

/// Quote `s` the way the tokenizer reads strings back.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    escape_into(&mut out, s, "\\n");
    out.push('"');
    out
}

/// Quote string segment text. `<cr>` is written as `\n`, so real line feeds take the long escape.
fn quote_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for (i, line) in s.split("<cr>").enumerate() {
        if i > 0 {
            out.push_str("\\n");
        }
        escape_into(&mut out, line, "\\u{000a}");
    }
    out.push('"');
    out
}

fn escape_into(out: &mut String, s: &str, line_feed: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str(line_feed),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:04x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
}
