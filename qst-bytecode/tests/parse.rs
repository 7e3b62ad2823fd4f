mod common;

use common::{Script, layout, mnemonics};
use qst_bytecode::{ProblemKind, Severity};
use qst_ir::{Segment, SegmentType};
use qst_isa::{Arg, Format, by_mnemonic};

use SegmentType::{Data, Instructions, String as Str};

/// Entry code registering a floor handler through the argument stack.
fn floor_handler_script() -> Script {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0)
        .op("set_episode", &[0])
        .op("arg_pushl", &[0])
        .op("arg_pushw", &[150])
        .op("set_floor_handler", &[])
        .op("ret", &[]);
    s.label(150)
        .op("arg_pushl", &[1])
        .op("set_mainwarp", &[])
        .op("ret", &[]);
    s
}

#[test]
fn stack_passed_label_is_followed() {
    let decoded = floor_handler_script().parse(&[0], false);
    assert!(decoded.problems.is_empty(), "{:?}", decoded.problems);
    let ir = decoded.ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [(Instructions, vec![0]), (Instructions, vec![150])]
    );
    assert_eq!(
        mnemonics(&ir.segments[0]),
        ["set_episode", "arg_pushl", "arg_pushw", "set_floor_handler", "ret"]
    );
    assert_eq!(mnemonics(&ir.segments[1]), ["arg_pushl", "set_mainwarp", "ret"]);
}

#[test]
fn jump_target_is_code_and_gap_is_data() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("jmp", &[2]);
    s.label(1).raw(&[0xFF; 4]);
    s.label(2).op("ret", &[]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [(Instructions, vec![0]), (Data, vec![1]), (Instructions, vec![2])]
    );
}

#[test]
fn control_drops_through_into_next_segment() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("set_episode", &[0]);
    s.label(1);
    for _ in 0..12 {
        s.op("nop", &[]);
    }
    s.op("ret", &[]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [(Instructions, vec![0]), (Instructions, vec![1])]
    );
    assert_eq!(mnemonics(&ir.segments[1]).len(), 13);
}

#[test]
fn unreferenced_nop_run_is_data() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("ret", &[]);
    s.label(1);
    for _ in 0..12 {
        s.op("nop", &[]);
    }
    s.op("ret", &[]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(layout(&ir.segments), [(Instructions, vec![0]), (Data, vec![1])]);
}

#[test]
fn unreferenced_plausible_code_is_code() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("ret", &[]);
    s.label(1).op("set_episode", &[1]).op("ret", &[]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [(Instructions, vec![0]), (Instructions, vec![1])]
    );
}

#[test]
fn data_label_keeps_decodable_bytes_raw() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("get_npc_data", &[1]).op("ret", &[]);
    // Would decode as `ret; nop; nop; nop`.
    s.label(1).raw(&[0x01, 0x00, 0x00, 0x00]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(layout(&ir.segments), [(Instructions, vec![0]), (Data, vec![1])]);
    let Segment::Data(data) = &ir.segments[1] else {
        panic!("expected a data segment");
    };
    assert_eq!(data.data, [0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn code_reference_reclassifies_data() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0)
        .op("get_npc_data", &[1])
        .op("call", &[2])
        .op("ret", &[]);
    s.label(1).op("ret", &[]);
    // Only found in the second pass, after label 1 was parsed as data.
    s.label(2).op("call", &[1]).op("ret", &[]);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [
            (Instructions, vec![0]),
            (Instructions, vec![1]),
            (Instructions, vec![2])
        ]
    );
}

#[test]
fn string_segment_keeps_odd_size() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("npc_action_string", &[0, 1, 20]).op("ret", &[]);
    s.label(20).string("Hi", 12);

    let ir = s.parse(&[0], false).ir.unwrap();
    assert_eq!(layout(&ir.segments), [(Instructions, vec![0]), (Str, vec![20])]);
    let Segment::String(string) = &ir.segments[1] else {
        panic!("expected a string segment");
    };
    assert_eq!(string.value, "Hi");
    assert_eq!(string.size, Some(12));
    assert_eq!(ir.size(Format::NetworkVariant), s.bytes.len());
}

#[test]
fn canonical_string_size_is_not_stored() {
    let mut s = Script::new(Format::Legacy);
    s.label(0).op("npc_action_string", &[0, 1, 1]).op("ret", &[]);
    s.label(1).string("abc", 4);

    let ir = s.parse(&[0], false).ir.unwrap();
    let Segment::String(string) = &ir.segments[1] else {
        panic!("expected a string segment");
    };
    assert_eq!(string.size, None);
}

#[test]
fn unpaired_surrogates_are_reported() {
    let mut s = Script::new(Format::Desktop);
    s.label(0).op("npc_action_string", &[0, 1, 1]);
    let pushs = by_mnemonic("arg_pushs").unwrap();
    let insn_at = s.bytes.len();
    let arg_at = insn_at + pushs.size();
    s.op_args("arg_pushs", &[Arg::Str("ab".to_string())])
        .op("arg_pushl", &[0])
        .op("message", &[])
        .op("ret", &[]);
    s.bytes[arg_at..arg_at + 2].copy_from_slice(&0xD800u16.to_le_bytes());
    s.label(1).raw(&[b'H', 0, 0x00, 0xDC, 0, 0, 0, 0]);

    let decoded = s.parse(&[0], false);
    assert!(!decoded.has_errors(), "{:?}", decoded.problems);
    let warned_at = |offset: usize| {
        decoded.problems.iter().any(|p| {
            p.kind == ProblemKind::DecodeWarning
                && p.offset == Some(offset)
                && p.message.contains("can't be decoded")
        })
    };
    assert!(warned_at(insn_at), "{:?}", decoded.problems);
    assert!(warned_at(s.label_offsets[1] as usize), "{:?}", decoded.problems);
}

#[test]
fn builtin_functions_are_not_reported() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0)
        .op("call", &[800])
        .op("call", &[77])
        .op("ret", &[]);

    let decoded = s.parse(&[0], false);
    assert!(decoded.ir.is_some());
    let messages: Vec<_> = decoded.problems.iter().map(|p| p.message.as_str()).collect();
    assert_eq!(messages, ["Label 77 is not registered in the label table."]);
    assert_eq!(decoded.problems[0].kind, ProblemKind::DecodeWarning);
}

#[test]
fn dangling_label_is_reported() {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("ret", &[]);
    s.label_at(5, 1000);

    let decoded = s.parse(&[0], false);
    assert!(!decoded.has_errors());
    assert!(
        decoded
            .problems
            .iter()
            .any(|p| p.message == "Label 5 doesn't point to anything."),
        "{:?}",
        decoded.problems
    );
}

/// `get_random` picks the handler label out of `[100, upper)`.
fn random_handler_script(upper: i32) -> Script {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0)
        .op("leti", &[10, 100])
        .op("leti", &[11, upper])
        .op("get_random", &[10, 20])
        .op("arg_pushl", &[0])
        .op("arg_pushr", &[20])
        .op("set_floor_handler", &[])
        .op("ret", &[]);
    s.label(100);
    for _ in 0..12 {
        s.op("nop", &[]);
    }
    s.op("ret", &[]);
    s
}

#[test]
fn register_candidates_are_followed() {
    let decoded = random_handler_script(105).parse(&[0], false);
    let ir = decoded.ir.unwrap();
    assert_eq!(
        layout(&ir.segments),
        [(Instructions, vec![0]), (Instructions, vec![100])]
    );
    // 101 to 104 aren't in the label table.
    assert_eq!(decoded.problems.len(), 4, "{:?}", decoded.problems);
}

#[test]
fn too_many_candidates_are_ignored() {
    let decoded = random_handler_script(112).parse(&[0], false);
    let ir = decoded.ir.unwrap();
    assert_eq!(layout(&ir.segments), [(Instructions, vec![0]), (Data, vec![100])]);
    assert!(decoded.problems.is_empty(), "{:?}", decoded.problems);
}

fn truncated_script() -> Script {
    let mut s = Script::new(Format::NetworkVariant);
    s.label(0).op("set_episode", &[0]).op("leti", &[10, 5]);
    s.bytes.truncate(s.bytes.len() - 2);
    s
}

#[test]
fn truncated_instruction_fails_strict_decoding() {
    let decoded = truncated_script().parse(&[0], false);
    assert!(decoded.ir.is_none());
    assert!(decoded.has_errors());
    let problem = &decoded.problems[0];
    assert_eq!(problem.kind, ProblemKind::StructuralError);
    assert_eq!(problem.severity, Severity::Error);
    assert_eq!(problem.offset, Some(6));
}

#[test]
fn truncated_instruction_decodes_leniently() {
    let script = truncated_script();
    let decoded = script.parse(&[0], true);
    assert!(!decoded.has_errors(), "{:?}", decoded.problems);
    assert!(
        decoded
            .problems
            .iter()
            .any(|p| p.kind == ProblemKind::StructuralError && p.severity == Severity::Warning)
    );

    let ir = decoded.ir.unwrap();
    assert_eq!(ir.size(script.format), script.bytes.len());
    let insns = &ir.segments[0].as_instructions().unwrap().instructions;
    assert_eq!(insns.len(), 2);
    assert!(!insns[1].valid);
    assert_eq!(insns[1].opcode.mnemonic, "leti");
    assert_eq!(insns[0].args, [Arg::Int(0)]);
}

#[test]
fn empty_buffer_decodes_to_nothing() {
    let s = Script::new(Format::NetworkVariant);
    let decoded = s.parse(&[0], false);
    assert!(decoded.ir.unwrap().segments.is_empty());
    let messages: Vec<_> = decoded.problems.iter().map(|p| p.message.as_str()).collect();
    assert_eq!(messages, ["Label 0 is not registered in the label table."]);
}
