mod common;

use common::{insn, segment};
use qst_ir::*;

#[test]
fn blocks_split_after_branches() {
    let segments = [segment(
        &[0],
        vec![
            insn("leti", &[0, 1]),
            insn("jmp_on", &[10, 1]),
            insn("leti", &[0, 2]),
            insn("call", &[20]),
            insn("ret", &[]),
        ],
    )];
    let cfg = ControlFlowGraph::build(&segments);

    let shape: Vec<_> = cfg
        .blocks
        .iter()
        .map(|b| (b.start, b.end, b.branch))
        .collect();
    assert_eq!(
        shape,
        [
            (0, 2, BranchType::ConditionalJump),
            (2, 4, BranchType::Call),
            (4, 5, BranchType::Return),
        ]
    );
    assert_eq!(cfg.blocks[0].branch_labels, [10]);
    assert_eq!(cfg.block_for_label(0), Some(0));
}

#[test]
fn trailing_instructions_end_with_none() {
    let segments = [
        segment(&[0], vec![insn("nop", &[]), insn("leti", &[0, 1])]),
        segment(&[1], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks[0].branch, BranchType::None);
    assert_eq!(cfg.blocks[0].succs, [1], "segments fall through in order");
    assert_eq!(cfg.blocks[1].preds, [0]);
}

#[test]
fn jump_has_no_fall_through() {
    let segments = [
        segment(&[0], vec![insn("jmp", &[2])]),
        segment(&[1], vec![insn("ret", &[])]),
        segment(&[2], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks[0].succs, [2]);
    assert!(cfg.blocks[1].preds.is_empty());
}

#[test]
fn conditional_jump_links_both_ways() {
    let segments = [
        segment(&[0], vec![insn("jmpi_=", &[0, 5, 2])]),
        segment(&[1], vec![insn("ret", &[])]),
        segment(&[2], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks[0].succs, [1, 2]);
}

#[test]
fn switch_jump_targets_every_label() {
    let segments = [
        segment(&[0], vec![insn("switch_jmp", &[0, 1, 2])]),
        segment(&[1], vec![insn("ret", &[])]),
        segment(&[2], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks[0].branch_labels, [1, 2]);
    assert_eq!(cfg.blocks[0].succs, [1, 2]);
}

#[test]
fn callee_returns_to_caller() {
    let segments = [
        segment(&[0], vec![insn("call", &[100]), insn("ret", &[])]),
        segment(
            &[100],
            vec![insn("jmp_on", &[101, 0]), insn("ret", &[])],
        ),
        segment(&[101], vec![insn("nop", &[]), insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    // Blocks: 0 call, 1 ret, 2 jmp_on, 3 ret, 4 nop+ret
    assert_eq!(cfg.blocks.len(), 5);
    assert_eq!(cfg.blocks[0].succs, [2], "a call doesn't fall through directly");
    let mut preds = cfg.blocks[1].preds.clone();
    preds.sort();
    assert_eq!(preds, [3, 4], "both returns of the callee flow back");
}

#[test]
fn call_to_single_return_block() {
    let segments = [
        segment(&[0], vec![insn("call", &[7]), insn("ret", &[])]),
        segment(&[7], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks[2].succs, [1]);
}

#[test]
fn recursive_calls_terminate() {
    let segments = [segment(
        &[0],
        vec![insn("jmp_on", &[0, 1]), insn("call", &[0]), insn("ret", &[])],
    )];
    let cfg = ControlFlowGraph::build(&segments);
    assert_eq!(cfg.blocks.len(), 3);
}

#[test]
fn block_lookup_by_instruction() {
    let segments = [
        segment(&[0], vec![insn("nop", &[]), insn("jmp", &[1]), insn("nop", &[])]),
        segment(&[1], vec![]),
        segment(&[2], vec![insn("ret", &[])]),
    ];
    let cfg = ControlFlowGraph::build(&segments);
    let at = |segment, index| cfg.block_of(InsnRef { segment, index });
    assert_eq!(at(0, 0), Some(0));
    assert_eq!(at(0, 1), Some(0));
    assert_eq!(at(0, 2), Some(1));
    assert_eq!(at(0, 3), None);
    assert_eq!(at(1, 0), None, "empty segments have no blocks");
    assert_eq!(at(2, 0), Some(2));
    assert_eq!(cfg.block_for_label(1), None);
    assert_eq!(cfg.instructions(2).len(), 1);
}
