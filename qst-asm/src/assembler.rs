use std::collections::HashSet;
use std::fmt;

use qst_bytecode::Severity;
use qst_ir::{
    BytecodeIr, DataSegment, Instruction, InstructionSegment, Label, Segment, SegmentType,
    StringSegment,
};
use qst_isa::{Arg, Opcode, Param, ParamType, by_mnemonic, code, lookup};

use crate::tokenizer::{Token, TokenKind, tokenize_line};

/// Vararg lists are written with a one-byte length.
const MAX_VARARG_LEN: usize = 255;

/// A diagnostic tied to a span of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyProblem {
    pub severity: Severity,
    pub message: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column.
    pub col: usize,
    pub len: usize,
}

impl fmt::Display for AssemblyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}:{}: {severity}: {}", self.line, self.col, self.message)
    }
}

/// Result of [`assemble`]. The IR is complete even when there are errors, invalid
/// instructions are marked as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub ir: BytecodeIr,
    pub problems: Vec<AssemblyProblem>,
}

impl Assembled {
    pub fn has_errors(&self) -> bool {
        self.problems.iter().any(|p| p.severity == Severity::Error)
    }
}

/// Assemble text into IR.
///
/// With `inline_stack_args`, operands written for a stack consuming instruction are lowered to
/// the matching `arg_push*` instructions. Otherwise such instructions take no operands and the
/// pushes have to be written out.
pub fn assemble<S: AsRef<str>>(lines: &[S], inline_stack_args: bool) -> Assembled {
    log::trace!("assembling {} lines", lines.len());

    let mut assembler = Assembler {
        inline_stack_args,
        segments: Vec::new(),
        current: None,
        section: SegmentType::Instructions,
        first_section_marker: true,
        prev_line_had_label: false,
        labels: HashSet::new(),
        problems: Vec::new(),
        line: 0,
    };

    for (i, line) in lines.iter().enumerate() {
        assembler.line = i + 1;
        let tokens = tokenize_line(line.as_ref());
        if let Some((first, rest)) = tokens.split_first() {
            assembler.prev_line_had_label = assembler.parse_line(first, rest);
        }
    }

    log::trace!(
        "assembled {} segments, {} problems",
        assembler.segments.len(),
        assembler.problems.len()
    );

    Assembled {
        ir: BytecodeIr::new(assembler.segments),
        problems: assembler.problems,
    }
}

struct Assembler {
    inline_stack_args: bool,
    segments: Vec<Segment>,
    /// Index of the segment new content is appended to.
    current: Option<usize>,
    section: SegmentType,
    first_section_marker: bool,
    prev_line_had_label: bool,
    labels: HashSet<Label>,
    problems: Vec<AssemblyProblem>,
    line: usize,
}

impl Assembler {
    fn problem(&mut self, severity: Severity, col: usize, len: usize, message: impl Into<String>) {
        self.problems.push(AssemblyProblem {
            severity,
            message: message.into(),
            line: self.line,
            col,
            len,
        });
    }

    fn error(&mut self, token: &Token, message: impl Into<String>) {
        self.problem(Severity::Error, token.col, token.len, message);
    }

    /// Returns whether the line started with a label.
    fn parse_line(&mut self, first: &Token, rest: &[Token]) -> bool {
        match (&first.kind, self.section) {
            (TokenKind::Label(label), _) => {
                self.parse_label(first, *label, rest);
                return true;
            }
            (TokenKind::CodeSection, _) => self.parse_section(first, SegmentType::Instructions, rest),
            (TokenKind::DataSection, _) => self.parse_section(first, SegmentType::Data, rest),
            (TokenKind::StringSection, _) => self.parse_section(first, SegmentType::String, rest),
            (TokenKind::Ident(mnemonic), SegmentType::Instructions) => {
                self.parse_instruction(first, mnemonic, rest)
            }
            (TokenKind::Int(_), SegmentType::Data) => self.parse_bytes(first, rest),
            (TokenKind::Str { segment, .. }, SegmentType::String) => {
                self.parse_string(segment, rest)
            }
            (TokenKind::UnterminatedStr(_), _) => self.error(first, "Unterminated string."),
            (TokenKind::InvalidSection, _) => self.error(first, "Invalid section type."),
            (TokenKind::InvalidIdent, _) => self.error(first, "Invalid identifier."),
            _ => self.error(first, "Unexpected token."),
        }
        false
    }

    fn parse_label(&mut self, token: &Token, label: Label, rest: &[Token]) {
        if !self.labels.insert(label) {
            self.error(token, "Duplicate label.");
        }

        match self.current {
            // Labels on consecutive lines name the same segment.
            Some(index) if self.prev_line_had_label => {
                self.segments[index].add_label(label);
            }
            _ => {
                let segment = match self.section {
                    SegmentType::Instructions => Segment::Instructions(InstructionSegment {
                        labels: vec![label],
                        instructions: Vec::new(),
                    }),
                    SegmentType::Data => Segment::Data(DataSegment {
                        labels: vec![label],
                        data: Vec::new(),
                    }),
                    SegmentType::String => Segment::String(StringSegment {
                        labels: vec![label],
                        value: String::new(),
                        size: None,
                    }),
                };
                self.current = Some(self.segments.len());
                self.segments.push(segment);
            }
        }

        let Some((next, rest)) = rest.split_first() else {
            return;
        };
        match (&next.kind, self.section) {
            (TokenKind::Ident(mnemonic), SegmentType::Instructions) => {
                self.parse_instruction(next, mnemonic, rest)
            }
            (TokenKind::Int(_), SegmentType::Data) => self.parse_bytes(next, rest),
            (TokenKind::Str { segment, .. }, SegmentType::String) => {
                self.parse_string(segment, rest)
            }
            (_, SegmentType::Instructions) => self.error(next, "Expected opcode mnemonic."),
            (_, SegmentType::Data) => self.error(next, "Expected bytes."),
            (_, SegmentType::String) => self.error(next, "Expected a string."),
        }
    }

    fn parse_section(&mut self, token: &Token, section: SegmentType, rest: &[Token]) {
        if self.section == section && !self.first_section_marker {
            self.problem(
                Severity::Warning,
                token.col,
                token.len,
                "Unnecessary section marker.",
            );
        }
        if self.section != section {
            self.current = None;
        }
        self.section = section;
        self.first_section_marker = false;

        if let Some(next) = rest.first() {
            self.error(next, "Unexpected token.");
        }
    }

    /// The segment content of type `ty` is appended to, created unlabeled if needed.
    fn current_segment(&mut self, ty: SegmentType) -> &mut Segment {
        let index = match self.current {
            Some(index) if self.segments[index].ty() == ty => index,
            _ => {
                let segment = match ty {
                    SegmentType::Instructions => Segment::Instructions(InstructionSegment::default()),
                    SegmentType::Data => Segment::Data(DataSegment::default()),
                    SegmentType::String => Segment::String(StringSegment::default()),
                };
                self.segments.push(segment);
                self.segments.len() - 1
            }
        };
        self.current = Some(index);
        &mut self.segments[index]
    }

    fn add_instruction(&mut self, instruction: Instruction) {
        if let Segment::Instructions(s) = self.current_segment(SegmentType::Instructions) {
            s.instructions.push(instruction);
        }
    }

    fn parse_instruction(&mut self, token: &Token, mnemonic: &str, args: &[Token]) {
        let Some(opcode) = by_mnemonic(mnemonic) else {
            self.error(token, "Unknown instruction.");
            return;
        };

        let stack_args = opcode.is_pop() && self.inline_stack_args;
        let arg_count = args
            .iter()
            .filter(|t| t.kind != TokenKind::ArgSeparator)
            .count();

        // Operands of stack consumers may also be pushed explicitly.
        if opcode.is_pop() && arg_count == 0 {
            self.add_instruction(Instruction::new(opcode, Vec::new()));
            return;
        }

        let param_count = if opcode.is_pop() && !self.inline_stack_args {
            0
        } else {
            opcode.params.len()
        };
        let varargs = opcode.has_varargs();
        // A vararg list may be empty.
        let min_count = if varargs { param_count - 1 } else { param_count };

        let count_error = if varargs && arg_count < min_count {
            Some(format!(
                "Expected at least {min_count} argument{}, got {arg_count}.",
                plural(min_count)
            ))
        } else if varargs && arg_count - min_count > MAX_VARARG_LEN {
            Some(format!(
                "Expected at most {} arguments, got {arg_count}.",
                min_count + MAX_VARARG_LEN
            ))
        } else if !varargs && arg_count != param_count {
            Some(format!(
                "Expected {param_count} argument{}, got {arg_count}.",
                plural(param_count)
            ))
        } else {
            None
        };

        if let Some(message) = &count_error {
            let len = args
                .last()
                .map_or(token.len, |last| last.col + last.len - token.col);
            self.problem(Severity::Error, token.col, len, message.clone());
        }

        let parsed = self.parse_args(opcode.params, args, stack_args);
        if count_error.is_some() || !parsed.valid {
            self.add_invalid(opcode, parsed);
            return;
        }

        if stack_args {
            for (i, (arg, kind)) in parsed.args.into_iter().enumerate() {
                let Some(param) = stack_param(opcode, i) else {
                    break;
                };
                if let Some(push) = lower_stack_arg(param, arg, kind) {
                    self.add_instruction(push);
                }
            }
            self.add_instruction(Instruction::new(opcode, Vec::new()));
        } else {
            let args = parsed.args.into_iter().map(|(arg, _)| arg).collect();
            self.add_instruction(Instruction::new(opcode, args));
        }
    }

    /// Keep an instruction that couldn't be assembled, so later lines still line up.
    fn add_invalid(&mut self, opcode: &'static Opcode, parsed: ParsedArgs) {
        let args = if opcode.is_pop() {
            Vec::new()
        } else {
            parsed.args.into_iter().map(|(arg, _)| arg).collect()
        };
        self.add_instruction(Instruction {
            opcode,
            args,
            valid: false,
        });
    }

    fn parse_args(&mut self, params: &[Param], tokens: &[Token], stack: bool) -> ParsedArgs {
        let mut parsed = ParsedArgs {
            args: Vec::new(),
            valid: true,
        };
        let mut should_be_arg = true;
        let mut param_idx = 0;

        for (i, token) in tokens.iter().enumerate() {
            let param = params.get(param_idx);

            if token.kind == TokenKind::ArgSeparator {
                if should_be_arg {
                    self.error(token, "Expected an argument.");
                } else if !param.is_some_and(|p| p.ty.is_vararg()) {
                    param_idx += 1;
                }
                should_be_arg = true;
                continue;
            }

            if !should_be_arg {
                let prev = &tokens[i - 1];
                let col = prev.col + prev.len;
                self.problem(Severity::Error, col, token.col - col, "Expected a comma.");
            }
            should_be_arg = false;

            let Some(param) = param else {
                // Surplus argument, already reported as a count mismatch.
                if let Some(arg) = loose_arg(&token.kind) {
                    parsed.args.push((arg, ArgKind::Literal));
                }
                continue;
            };

            let matched = match (&token.kind, param.ty) {
                (TokenKind::Int(value), ty) => match int_width(ty, stack) {
                    Some(bits) => {
                        match self.check_int(token, *value, bits) {
                            Some(value) => parsed.args.push((Arg::Int(value), ArgKind::Literal)),
                            None => parsed.valid = false,
                        }
                        true
                    }
                    None if ty == ParamType::Float => {
                        parsed.args.push((Arg::Float(*value as f32), ArgKind::Literal));
                        true
                    }
                    None => false,
                },
                (TokenKind::Float(value), ParamType::Float) => {
                    parsed.args.push((Arg::Float(*value), ArgKind::Literal));
                    true
                }
                (TokenKind::Register(register), ty) => {
                    if *register > 255 {
                        self.error(token, "Invalid register reference, expected r0-r255.");
                        parsed.valid = false;
                    } else {
                        parsed
                            .args
                            .push((Arg::Int(*register as i32), ArgKind::Register));
                    }
                    stack || ty.is_register()
                }
                (TokenKind::Str { value, .. }, ParamType::String) => {
                    parsed.args.push((Arg::Str(value.clone()), ArgKind::Literal));
                    true
                }
                _ => false,
            };

            if !matched {
                parsed.valid = false;
                self.error(token, format!("Expected {}.", param.ty.describe()));
            }
        }

        parsed
    }

    /// Checks that `value` fits `bits`, signed or unsigned, and truncates it to an `i32`.
    fn check_int(&mut self, token: &Token, value: i64, bits: u32) -> Option<i32> {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << bits) - 1;
        if value < min {
            self.error(token, format!("{bits}-bit integer can't be less than {min}."));
            None
        } else if value > max {
            self.error(token, format!("{bits}-bit integer can't be greater than {max}."));
            None
        } else {
            Some(value as i32)
        }
    }

    fn parse_bytes(&mut self, first: &Token, rest: &[Token]) {
        let mut bytes = Vec::with_capacity(rest.len() + 1);

        for token in std::iter::once(first).chain(rest) {
            let TokenKind::Int(value) = token.kind else {
                self.error(token, "Expected an unsigned 8-bit integer.");
                break;
            };
            if value < 0 {
                self.error(token, "Unsigned 8-bit integer can't be less than 0.");
            } else if value > 255 {
                self.error(token, "Unsigned 8-bit integer can't be greater than 255.");
            } else {
                bytes.push(value as u8);
            }
        }

        if let Segment::Data(s) = self.current_segment(SegmentType::Data) {
            s.data.extend_from_slice(&bytes);
        }
    }

    fn parse_string(&mut self, text: &str, rest: &[Token]) {
        if let Some(next) = rest.first() {
            self.error(next, "Unexpected token.");
        }
        if let Segment::String(s) = self.current_segment(SegmentType::String) {
            s.value.push_str(text);
        }
    }
}

/// How an operand was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Literal,
    Register,
}

struct ParsedArgs {
    args: Vec<(Arg, ArgKind)>,
    /// False when an argument has the wrong type or is out of range.
    valid: bool,
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Width of the integer literals `ty` accepts. Register parameters of stack consumers accept
/// byte literals.
fn int_width(ty: ParamType, stack: bool) -> Option<u32> {
    match ty {
        ParamType::Byte => Some(8),
        ParamType::RegRef | ParamType::RegTupRef(_) if stack => Some(8),
        ParamType::Word
        | ParamType::Label
        | ParamType::ILabel
        | ParamType::DLabel
        | ParamType::SLabel
        | ParamType::ILabelVar => Some(16),
        ParamType::DWord => Some(32),
        _ => None,
    }
}

/// Best-effort argument for operands without a matching parameter.
fn loose_arg(kind: &TokenKind) -> Option<Arg> {
    match kind {
        TokenKind::Int(v) => Some(Arg::Int(*v as i32)),
        TokenKind::Float(v) => Some(Arg::Float(*v)),
        TokenKind::Register(r) => Some(Arg::Int(*r as i32)),
        TokenKind::Str { value, .. } => Some(Arg::Str(value.clone())),
        _ => None,
    }
}

/// Parameter receiving the `index`th stack operand. A trailing vararg parameter receives all
/// remaining operands.
pub(crate) fn stack_param(opcode: &Opcode, index: usize) -> Option<&'static Param> {
    opcode
        .params
        .get(index)
        .or_else(|| opcode.params.last().filter(|p| p.ty.is_vararg()))
}

/// The push instruction that places `arg` on the stack for `param`.
fn lower_stack_arg(param: &Param, arg: Arg, kind: ArgKind) -> Option<Instruction> {
    let push = match (kind, param.ty) {
        (ArgKind::Register, ParamType::RegTupRef(_) | ParamType::RegRefVar) => code::ARG_PUSHB,
        (ArgKind::Register, _) => code::ARG_PUSHR,
        (_, ParamType::Byte | ParamType::RegRef | ParamType::RegTupRef(_)) => code::ARG_PUSHB,
        (
            _,
            ParamType::Word
            | ParamType::Label
            | ParamType::ILabel
            | ParamType::DLabel
            | ParamType::SLabel
            | ParamType::ILabelVar,
        ) => code::ARG_PUSHW,
        (_, ParamType::DWord) => code::ARG_PUSHL,
        (_, ParamType::Float) => {
            let bits = arg.as_float()?.to_bits() as i32;
            return Some(Instruction::new(lookup(code::ARG_PUSHL)?, vec![Arg::Int(bits)]));
        }
        (_, ParamType::String) => code::ARG_PUSHS,
        (_, ty) => {
            log::error!("can't pass {} operands through the stack", ty.describe());
            return None;
        }
    };
    Some(Instruction::new(lookup(push)?, vec![arg]))
}
