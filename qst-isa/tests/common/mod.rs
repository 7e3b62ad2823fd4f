use qst_isa::*;

/// Encode one instruction, decode it back and compare opcode, arguments and size.
pub fn assert_roundtrip(opcode: &'static Opcode, args: &[Arg], format: Format) {
    let mut bytes = Vec::new();
    encode(opcode, args, format, &mut bytes).unwrap();
    assert_eq!(
        bytes.len(),
        encoded_size(opcode, args, format),
        "encoded_size disagrees with encode for {opcode}"
    );
    let decoded = decode_opcode(&bytes, 0).unwrap();
    assert_eq!(decoded, opcode, "opcode mismatch");
    let (decoded_args, size) = decode_args(&bytes, 0, decoded, format).unwrap();
    assert_eq!(size, bytes.len(), "size mismatch for {opcode}");
    if opcode.is_pop() {
        assert!(decoded_args.is_empty(), "{opcode} pops its arguments");
    } else {
        assert_eq!(decoded_args, args, "argument mismatch for {opcode}");
    }
}

pub fn int_args(values: &[i32]) -> Vec<Arg> {
    values.iter().map(|&v| Arg::Int(v)).collect()
}
