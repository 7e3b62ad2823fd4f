//! Best-effort recovery of the values registers and stack slots can hold.
//!
//! Both queries walk the control flow graph backward from an instruction. They may answer
//! "every value" when they can't tell, but never omit a value the program can produce.

use std::collections::HashSet;

use qst_isa::{Arg, Param, ParamType, code};

use crate::cfg::{BlockId, ControlFlowGraph, InsnRef};
use crate::value_set::ValueSet;

/// Number of blocks a single query may visit before giving up.
const MAX_ITERATIONS: usize = 100;

/// Possible values of `register` right before `insn` executes.
pub fn get_register_value(cfg: &ControlFlowGraph, insn: InsnRef, register: u8) -> ValueSet {
    let Some(block) = cfg.block_of(insn) else {
        return ValueSet::all();
    };
    Finder::new(cfg).register(&HashSet::new(), block, insn.index, register as i32)
}

/// Possible values of the argument stack slot `depth` positions below the top right before
/// `insn` executes. Depth 0 is the most recently pushed value.
///
/// Only pushes that directly precede `insn` are considered. Any other instruction in between
/// makes the slot unknown.
pub fn get_stack_value(cfg: &ControlFlowGraph, insn: InsnRef, depth: usize) -> ValueSet {
    let Some(block) = cfg.block_of(insn) else {
        return ValueSet::all();
    };
    Finder::new(cfg).stack(&HashSet::new(), block, insn.index, depth)
}

struct Finder<'c, 'a> {
    cfg: &'c ControlFlowGraph<'a>,
    iterations: usize,
}

impl<'c, 'a> Finder<'c, 'a> {
    fn new(cfg: &'c ControlFlowGraph<'a>) -> Self {
        Finder { cfg, iterations: 0 }
    }

    fn exhausted(&mut self) -> bool {
        self.iterations += 1;
        if self.iterations > MAX_ITERATIONS {
            log::warn!("value analysis gave up after {MAX_ITERATIONS} iterations");
            return true;
        }
        false
    }

    /// Values of `register` before instruction `end` of `block`.
    fn register(
        &mut self,
        path: &HashSet<BlockId>,
        block: BlockId,
        end: usize,
        register: i32,
    ) -> ValueSet {
        if self.exhausted() {
            return ValueSet::all();
        }

        let cfg = self.cfg;
        let b = &cfg.blocks[block];
        let instructions = &cfg.segments[b.segment].instructions;

        for i in (b.start..end).rev() {
            let insn = &instructions[i];
            let arg = |k: usize| insn.int_arg(k);
            let writes_target = arg(0) == Some(register);

            match insn.opcode.code {
                // Concurrent code may have changed the register while this thread yielded.
                code::SYNC => return ValueSet::all(),
                code::VA_CALL => {
                    let value = self.va_call(path, block, i, register);
                    if !value.is_empty() {
                        return value;
                    }
                }
                code::LET if writes_target => {
                    return match arg(1) {
                        Some(src) => self.register(path, block, i, src),
                        None => ValueSet::all(),
                    };
                }
                code::LETI | code::LETB | code::LETW | code::SYNC_LETI if writes_target => {
                    return arg(1).map_or_else(ValueSet::all, ValueSet::of);
                }
                code::SET if writes_target => return ValueSet::of(1),
                code::CLEAR if writes_target => return ValueSet::of(0),
                code::REV if writes_target => {
                    let prev = self.register(path, block, i, register);
                    return if prev.len() == 1 && prev.contains(0) {
                        ValueSet::of(1)
                    } else if prev.contains(0) {
                        ValueSet::of_interval(0, 1)
                    } else {
                        ValueSet::of(0)
                    };
                }
                code::ADDI | code::SUBI | code::MULI | code::DIVI if writes_target => {
                    let Some(scalar) = arg(1) else {
                        return ValueSet::all();
                    };
                    let prev = self.register(path, block, i, register);
                    return match insn.opcode.code {
                        code::ADDI => prev.add(scalar),
                        code::SUBI => prev.sub(scalar),
                        code::MULI => prev.mul(scalar),
                        _ => prev.div(scalar),
                    };
                }
                code::IF_ZONE_CLEAR if writes_target => return ValueSet::of_interval(0, 1),
                code::GET_DIFFLVL if writes_target => return ValueSet::of_interval(0, 2),
                code::GET_SLOTNUMBER if writes_target => return ValueSet::of_interval(0, 3),
                code::GET_RANDOM if arg(1) == Some(register) => {
                    let Some(bounds) = arg(0) else {
                        return ValueSet::all();
                    };
                    let (Some(min), Some(max)) = (
                        self.register(path, block, i, bounds).min(),
                        self.register(path, block, i, bounds + 1).max(),
                    ) else {
                        return ValueSet::all();
                    };
                    let max = (max as i64).max(min as i64 + 1) - 1;
                    return ValueSet::of_interval(min, max as i32);
                }
                code::STACK_PUSHM | code::STACK_POPM => {
                    if let (Some(first), Some(count)) = (arg(0), arg(1)) {
                        let end = first as i64 + count as i64;
                        if (first as i64..end).contains(&(register as i64)) {
                            return ValueSet::all();
                        }
                    }
                }
                _ => {
                    if writes_register(insn.opcode.params, &insn.args, register) {
                        return ValueSet::all();
                    }
                }
            }
        }

        self.from_preds(path, block, |finder, path, pred, end| {
            finder.register(path, pred, end, register)
        })
    }

    /// Union of `query` over all predecessors of `block`. Every value if a predecessor is
    /// already on the path or if there are no predecessors to ask.
    fn from_preds(
        &mut self,
        path: &HashSet<BlockId>,
        block: BlockId,
        mut query: impl FnMut(&mut Self, &HashSet<BlockId>, BlockId, usize) -> ValueSet,
    ) -> ValueSet {
        let cfg = self.cfg;
        let mut path = path.clone();
        path.insert(block);

        let mut values = ValueSet::empty();
        for &pred in &cfg.blocks[block].preds {
            if path.contains(&pred) {
                return ValueSet::all();
            }
            let end = cfg.blocks[pred].end;
            values = values.union(&query(self, &path, pred, end));
        }

        if values.is_empty() {
            ValueSet::all()
        } else {
            values
        }
    }

    /// Values `va_call` at index `call` assigns to `register`. Arguments pushed after
    /// `va_start` land in r1..r7 in push order. Empty if the call doesn't touch the register.
    fn va_call(
        &mut self,
        path: &HashSet<BlockId>,
        block: BlockId,
        call: usize,
        register: i32,
    ) -> ValueSet {
        if !(1..=7).contains(&register) {
            return ValueSet::empty();
        }

        let cfg = self.cfg;
        let b = &cfg.blocks[block];
        let instructions = &cfg.segments[b.segment].instructions;
        let mut va_start = None;
        let mut pushed = Vec::new();

        for (i, insn) in instructions.iter().enumerate().take(call).skip(b.start) {
            if insn.opcode.code == code::VA_START {
                va_start = Some(i);
            } else if va_start.is_some() && insn.opcode.is_push() {
                pushed.push(insn);
            }
        }

        let Some(push) = pushed.get(register as usize - 1) else {
            return ValueSet::of(0);
        };
        match (push.opcode.code, push.int_arg(0), va_start) {
            (code::ARG_PUSHR, Some(src), Some(start)) => self.register(path, block, start, src),
            (code::ARG_PUSHL | code::ARG_PUSHB | code::ARG_PUSHW, Some(value), _) => {
                ValueSet::of(value)
            }
            _ => ValueSet::all(),
        }
    }

    /// Values of stack slot `depth` before instruction `end` of `block`.
    fn stack(
        &mut self,
        path: &HashSet<BlockId>,
        block: BlockId,
        end: usize,
        depth: usize,
    ) -> ValueSet {
        if self.exhausted() {
            return ValueSet::all();
        }

        let cfg = self.cfg;
        let b = &cfg.blocks[block];
        let instructions = &cfg.segments[b.segment].instructions;
        let mut depth = depth;

        for i in (b.start..end).rev() {
            let insn = &instructions[i];
            if !insn.opcode.is_push() {
                return ValueSet::all();
            }
            if depth == 0 {
                return match (insn.opcode.code, insn.int_arg(0)) {
                    (code::ARG_PUSHL | code::ARG_PUSHB | code::ARG_PUSHW, Some(value)) => {
                        ValueSet::of(value)
                    }
                    (code::ARG_PUSHR, Some(register)) => self.register(path, block, i, register),
                    _ => ValueSet::all(),
                };
            }
            depth -= 1;
        }

        self.from_preds(path, block, |finder, path, pred, end| {
            finder.stack(path, pred, end, depth)
        })
    }
}

/// Whether any register tuple argument writes `register`.
fn writes_register(params: &[Param], args: &[Arg], register: i32) -> bool {
    params.iter().zip(args).any(|(param, arg)| {
        let (ParamType::RegTupRef(registers), Some(base)) = (param.ty, arg.as_int()) else {
            return false;
        };
        registers.iter().enumerate().any(|(k, reg)| {
            reg.access.is_some_and(|a| a.writes()) && base as i64 + k as i64 == register as i64
        })
    })
}
