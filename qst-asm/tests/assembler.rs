mod common;

use common::{insn, insn_args, mnemonics, opcode, text};
use qst_asm::{AssemblyProblem, assemble};
use qst_bytecode::Severity;
use qst_ir::{Instruction, Segment, SegmentType};
use qst_isa::Arg;

fn instructions(segment: &Segment) -> &[Instruction] {
    &segment.as_instructions().expect("instruction segment").instructions
}

fn only_problem(problems: &[AssemblyProblem]) -> &AssemblyProblem {
    assert_eq!(problems.len(), 1, "expected one problem, got {problems:?}");
    &problems[0]
}

#[test]
fn stack_operands_are_lowered_to_pushes() {
    let result = assemble(&text("0:\n    set_floor_handler 1, 150\n    ret"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);

    assert_eq!(
        instructions(&result.ir.segments[0]),
        [
            insn("arg_pushl", &[1]),
            insn("arg_pushw", &[150]),
            insn("set_floor_handler", &[]),
            insn("ret", &[]),
        ]
    );
}

#[test]
fn register_operands_follow_the_param_type() {
    let result = assemble(&text("    p_dead_v3 r200, 3\n    exit r255"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);

    assert_eq!(
        instructions(&result.ir.segments[0]),
        [
            // Register tuples pass the register number, not its value.
            insn("arg_pushb", &[200]),
            insn("arg_pushl", &[3]),
            insn("p_dead_v3", &[]),
            insn("arg_pushr", &[255]),
            insn("exit", &[]),
        ]
    );
}

#[test]
fn float_operands_are_pushed_as_bit_patterns() {
    let result = assemble(&text("    particle2 r1, 2, 1.5"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);

    assert_eq!(
        instructions(&result.ir.segments[0]),
        [
            insn("arg_pushb", &[1]),
            insn("arg_pushl", &[2]),
            insn("arg_pushl", &[1.5f32.to_bits() as i32]),
            insn("particle2", &[]),
        ]
    );
}

#[test]
fn integers_are_accepted_for_inline_floats() {
    let result = assemble(&text("    fleti r0, 3"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);
    assert_eq!(
        instructions(&result.ir.segments[0]),
        [insn_args("fleti", vec![Arg::Int(0), Arg::Float(3.0)])]
    );
}

#[test]
fn explicit_pushes_are_accepted_in_automatic_mode() {
    let result = assemble(&text("    arg_pushl 1\n    exit"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);
    assert_eq!(mnemonics(&result.ir.segments[0]), ["arg_pushl", "exit"]);
}

#[test]
fn manual_stack_mode_rejects_operands() {
    let result = assemble(&text("    exit 1"), false);

    let problem = only_problem(&result.problems);
    assert_eq!(problem.severity, Severity::Error);
    assert_eq!(problem.message, "Expected 0 arguments, got 1.");
    assert_eq!((problem.line, problem.col, problem.len), (1, 5, 6));

    // The instruction is kept so the remaining lines still line up.
    let kept = &instructions(&result.ir.segments[0])[0];
    assert_eq!(kept.opcode, opcode("exit"));
    assert!(!kept.valid);
}

#[test]
fn missing_arguments_are_reported() {
    let result = assemble(&text("    leti r100"), true);

    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Expected 2 arguments, got 1.");
    assert_eq!(
        instructions(&result.ir.segments[0]),
        [Instruction {
            opcode: opcode("leti"),
            args: vec![Arg::Int(100)],
            valid: false,
        }]
    );
}

#[test]
fn vararg_lists_are_limited_to_255_elements() {
    let switch = |targets: u32| {
        let labels: Vec<String> = (0..targets).map(|l| l.to_string()).collect();
        format!("    switch_jmp r1, {}", labels.join(", "))
    };

    let result = assemble(&[switch(255)], true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);
    assert_eq!(instructions(&result.ir.segments[0])[0].args.len(), 256);

    let result = assemble(&[switch(256)], true);
    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Expected at most 256 arguments, got 257.");
    assert_eq!(problem.col, 5);
    assert!(!instructions(&result.ir.segments[0])[0].valid);
}

#[test]
fn out_of_range_values_are_reported() {
    let cases = [
        ("    letb r1, 256", "8-bit integer can't be greater than 255.", 14),
        ("    letw r1, -32769", "16-bit integer can't be less than -32768.", 14),
        ("    leti r256, 1", "Invalid register reference, expected r0-r255.", 10),
        ("    leti r1, \"x\"", "Expected a 32-bit integer.", 14),
    ];

    for (line, message, col) in cases {
        let result = assemble(&[line], true);
        let problem = only_problem(&result.problems);
        assert_eq!(problem.message, message, "for {line:?}");
        assert_eq!(problem.col, col, "for {line:?}");
        assert!(
            !instructions(&result.ir.segments[0])[0].valid,
            "expected {line:?} to be invalid"
        );
    }
}

#[test]
fn missing_comma_is_reported() {
    let result = assemble(&["    leti r1 5"], true);
    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Expected a comma.");
    assert_eq!((problem.col, problem.len), (12, 1));
}

#[test]
fn unknown_instruction_is_reported() {
    let result = assemble(&["0:", "    frobnicate 1"], true);
    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Unknown instruction.");
    assert_eq!(problem.line, 2);
    assert!(mnemonics(&result.ir.segments[0]).is_empty());
}

#[test]
fn consecutive_labels_share_a_segment() {
    let result = assemble(&text("    ret\n0:\n1:\n    ret\n2:\n    ret"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);

    let labels: Vec<_> = result.ir.segments.iter().map(|s| s.labels().to_vec()).collect();
    assert_eq!(labels, [vec![], vec![0, 1], vec![2]]);
}

#[test]
fn duplicate_labels_are_errors() {
    let result = assemble(&text("0:\n    ret\n0:\n    ret"), true);
    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Duplicate label.");
    assert_eq!(problem.line, 3);
    assert_eq!(result.ir.segments.len(), 2);
}

#[test]
fn data_and_string_sections() {
    let source = ".data\n10:\n    0x01 0xFF\n    7\n.string\n11:\n    \"Hi\\nthere\"";
    let result = assemble(&text(source), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);

    match &result.ir.segments[..] {
        [Segment::Data(data), Segment::String(string)] => {
            assert_eq!(data.labels, [10]);
            assert_eq!(data.data, [0x01, 0xFF, 7]);
            assert_eq!(string.labels, [11]);
            assert_eq!(string.value, "Hi<cr>there");
        }
        other => panic!("expected a data and a string segment, got {other:?}"),
    }
}

#[test]
fn bytes_out_of_range_are_reported() {
    let result = assemble(&text(".data\n0:\n    1 256"), true);
    let problem = only_problem(&result.problems);
    assert_eq!(problem.message, "Unsigned 8-bit integer can't be greater than 255.");
    assert_eq!(problem.col, 7);
}

#[test]
fn repeated_section_marker_is_a_warning() {
    let result = assemble(&text(".code\n0:\n    ret\n.code\n1:\n    ret"), true);

    let problem = only_problem(&result.problems);
    assert_eq!(problem.severity, Severity::Warning);
    assert_eq!(problem.message, "Unnecessary section marker.");
    assert_eq!(problem.line, 4);
    assert!(!result.has_errors());
    assert!(
        result
            .ir
            .segments
            .iter()
            .all(|s| s.ty() == SegmentType::Instructions)
    );
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let result = assemble(&text("// header\n\n0: // entry\n    ret // done\n"), true);
    assert!(result.problems.is_empty(), "{:?}", result.problems);
    assert_eq!(result.ir.segments.len(), 1);
    assert_eq!(mnemonics(&result.ir.segments[0]), ["ret"]);
}
