use std::collections::{BTreeMap, HashMap, HashSet};

use qst_isa::{OpcodeFlags, ParamType};

use crate::instruction::Instruction;
use crate::segment::{InstructionSegment, Label};

/// Index of a basic block within the CFG.
pub type BlockId = usize;

/// How control leaves a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchType {
    /// The block ends its segment without branching.
    None,
    /// `ret`.
    Return,
    /// `jmp`.
    Jump,
    /// Every other jump instruction.
    ConditionalJump,
    /// `call`, `va_call` or `switch_call`.
    Call,
}

/// Position of an instruction: the index of its segment within the graph and its index within
/// that segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnRef {
    pub segment: usize,
    pub index: usize,
}

/// A basic block: a maximal sequence of instructions with no internal branches.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Index of the owning segment within [`ControlFlowGraph::segments`].
    pub segment: usize,
    /// Index range into the segment's instructions [start..end).
    pub start: usize,
    pub end: usize,
    pub branch: BranchType,
    /// Jump or call targets, depending on `branch`.
    pub branch_labels: Vec<Label>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

/// Control flow graph over all instruction segments of a script.
///
/// Fall-through edges follow segment order, so segments should be passed in offset order.
#[derive(Debug)]
pub struct ControlFlowGraph<'a> {
    pub segments: Vec<&'a InstructionSegment>,
    /// Basic blocks, indexed by BlockId.
    pub blocks: Vec<BasicBlock>,
    /// Map from (segment, first instruction) to block ID.
    insn_to_block: BTreeMap<(usize, usize), BlockId>,
    label_to_block: HashMap<Label, BlockId>,
}

/// Branch type and targets of a block-ending instruction, `None` for anything else.
fn branch_of(insn: &Instruction) -> Option<(BranchType, Vec<Label>)> {
    let flags = insn.opcode.flags;
    let branch = if flags.contains(OpcodeFlags::RETURN) {
        BranchType::Return
    } else if flags.contains(OpcodeFlags::CALL) {
        BranchType::Call
    } else if flags.contains(OpcodeFlags::JUMP | OpcodeFlags::CONDITIONAL) {
        BranchType::ConditionalJump
    } else if flags.contains(OpcodeFlags::JUMP) {
        BranchType::Jump
    } else {
        return None;
    };

    let labels = insn
        .opcode
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p.ty, ParamType::ILabel | ParamType::ILabelVar))
        .flat_map(|(i, _)| insn.param_args(i))
        .filter_map(|arg| arg.as_int())
        .filter_map(|v| Label::try_from(v).ok())
        .collect();

    Some((branch, labels))
}

impl<'a> ControlFlowGraph<'a> {
    /// Build the graph. Segments without instructions contribute no blocks.
    pub fn build(segments: impl IntoIterator<Item = &'a InstructionSegment>) -> Self {
        let segments: Vec<&'a InstructionSegment> = segments.into_iter().collect();
        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut insn_to_block = BTreeMap::new();
        let mut label_to_block = HashMap::new();

        // Step 1: split every segment after each branching instruction
        for (seg_idx, segment) in segments.iter().enumerate() {
            let len = segment.instructions.len();
            let mut start = 0;

            for (i, insn) in segment.instructions.iter().enumerate() {
                let (branch, branch_labels) = match branch_of(insn) {
                    Some(b) => b,
                    None if i == len - 1 => (BranchType::None, vec![]),
                    None => continue,
                };

                let id = blocks.len();
                if start == 0 {
                    for &label in &segment.labels {
                        label_to_block.insert(label, id);
                    }
                }
                insn_to_block.insert((seg_idx, start), id);
                blocks.push(BasicBlock {
                    id,
                    segment: seg_idx,
                    start,
                    end: i + 1,
                    branch,
                    branch_labels,
                    succs: vec![],
                    preds: vec![],
                });
                start = i + 1;
            }
        }

        // Step 2: fall-through and branch edges
        let mut edges = Vec::new();
        // (calling block, block the callee returns to)
        let mut callers = Vec::new();

        for block in &blocks {
            let next = (block.id + 1 < blocks.len()).then_some(block.id + 1);
            match block.branch {
                BranchType::Return | BranchType::Jump => {}
                BranchType::Call => {
                    if let Some(next) = next {
                        callers.push((block.id, next));
                    }
                }
                BranchType::None | BranchType::ConditionalJump => {
                    if let Some(next) = next {
                        edges.push((block.id, next));
                    }
                }
            }
            for label in &block.branch_labels {
                if let Some(&target) = label_to_block.get(label) {
                    edges.push((block.id, target));
                }
            }
        }

        let mut cfg = ControlFlowGraph {
            segments,
            blocks,
            insn_to_block,
            label_to_block,
        };
        for (from, to) in edges {
            cfg.link(from, to);
        }

        // Step 3: returning blocks of each callee flow back to the caller's next block
        for (caller, ret) in callers {
            let labels = cfg.blocks[caller].branch_labels.clone();
            for label in labels {
                let Some(&callee) = cfg.label_to_block.get(&label) else {
                    continue;
                };
                if cfg.blocks[callee].branch == BranchType::Return {
                    cfg.link(callee, ret);
                } else {
                    cfg.link_returning_blocks(&mut HashSet::new(), ret, callee);
                }
            }
        }

        cfg
    }

    fn link(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
            self.blocks[to].preds.push(from);
        }
    }

    fn link_returning_blocks(
        &mut self,
        encountered: &mut HashSet<BlockId>,
        ret: BlockId,
        block: BlockId,
    ) {
        if !encountered.insert(block) {
            return;
        }
        let succs = self.blocks[block].succs.clone();
        for succ in succs {
            if self.blocks[succ].branch == BranchType::Return {
                self.link(succ, ret);
            } else {
                self.link_returning_blocks(encountered, ret, succ);
            }
        }
    }

    /// The block containing the given instruction.
    pub fn block_of(&self, insn: InsnRef) -> Option<BlockId> {
        self.insn_to_block
            .range(..=(insn.segment, insn.index))
            .next_back()
            .map(|(_, &id)| id)
            .filter(|&id| {
                let block = &self.blocks[id];
                block.segment == insn.segment && insn.index < block.end
            })
    }

    /// The first block of the segment the label points to.
    pub fn block_for_label(&self, label: Label) -> Option<BlockId> {
        self.label_to_block.get(&label).copied()
    }

    pub fn instructions(&self, block: BlockId) -> &'a [Instruction] {
        let block = &self.blocks[block];
        let segment: &'a InstructionSegment = self.segments[block.segment];
        &segment.instructions[block.start..block.end]
    }
}
