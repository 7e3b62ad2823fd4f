// Build script for qst-isa.
//
// Reads isa.yaml and writes `generated.rs` into OUT_DIR:
//   1. One `OP_<NAME>` static per opcode in the YAML file, plus a placeholder
//      static for every unassigned code of the three opcode pages.
//   2. The `code` module holding every opcode number as a `u16` constant.
//   3. The 768-entry lookup table (pages 0x00xx, 0xF8xx and 0xF9xx).
//   4. `by_mnemonic`, a match over every assigned mnemonic.

use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize)]
struct Isa {
    opcodes: Vec<OpcodeDef>,
}

#[derive(Deserialize)]
struct OpcodeDef {
    name: String,
    code: u16,
    mnemonic: String,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    params: Vec<ParamDef>,
}

#[derive(Deserialize)]
struct ParamDef {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    registers: Vec<ParamDef>,
}

const PAGES: [u16; 3] = [0x0000, 0xF800, 0xF900];

fn main() {
    let manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let isa_yaml = format!("{manifest}/isa.yaml");

    let text = fs::read_to_string(&isa_yaml)
        .unwrap_or_else(|e| panic!("Failed to read {isa_yaml}: {e}"));
    let isa: Isa = serde_yaml::from_str(&text)
        .unwrap_or_else(|e| panic!("Failed to parse {isa_yaml}: {e}"));

    let mut by_code: BTreeMap<u16, &OpcodeDef> = BTreeMap::new();
    for op in &isa.opcodes {
        assert!(
            page_index(op.code).is_some(),
            "opcode {} has code {:#x} outside the 0x00, 0xF8 and 0xF9 pages",
            op.name,
            op.code
        );
        if let Some(prev) = by_code.insert(op.code, op) {
            panic!("opcodes {} and {} share code {:#x}", prev.name, op.name, op.code);
        }
    }

    let mut out = String::new();
    out.push_str("// @generated by qst-isa/build.rs from isa.yaml. Do not edit.\n\n");

    // Phase 1: opcode statics.
    for op in &isa.opcodes {
        writeln!(
            out,
            "/// `{}`{}\npub static OP_{}: Opcode = {};",
            op.mnemonic,
            op.doc
                .as_deref()
                .map(|d| format!("\n///\n/// {}", d.replace('\n', "\n/// ")))
                .unwrap_or_default(),
            op.name,
            opcode_expr(op)
        )
        .unwrap();
    }
    for &page in &PAGES {
        for low in 0..=0xFFu16 {
            let code = page | low;
            if !by_code.contains_key(&code) {
                writeln!(
                    out,
                    "static UNASSIGNED_{code:04X}: Opcode = Opcode {{ code: {code:#06x}, \
                     mnemonic: {:?}, doc: None, params: &[], stack: None, \
                     flags: OpcodeFlags::empty(), known: false }};",
                    unknown_mnemonic(code)
                )
                .unwrap();
            }
        }
    }

    // Phase 2: numeric constants, usable as match patterns.
    out.push_str("\n/// Opcode numbers, one constant per assigned opcode.\npub mod code {\n");
    for op in &isa.opcodes {
        writeln!(out, "    pub const {}: u16 = {:#06x};", op.name, op.code).unwrap();
    }
    out.push_str("}\n\n");

    // Phase 3: lookup table.
    out.push_str("static OPCODES: [&Opcode; 768] = [\n");
    for &page in &PAGES {
        for low in 0..=0xFFu16 {
            let code = page | low;
            match by_code.get(&code) {
                Some(op) => writeln!(out, "    &OP_{},", op.name).unwrap(),
                None => writeln!(out, "    &UNASSIGNED_{code:04X},").unwrap(),
            }
        }
    }
    out.push_str("];\n\n");

    // Phase 4: mnemonic lookup.
    out.push_str(
        "/// Look up an opcode by its assembly mnemonic.\n\
         ///\n\
         /// Unassigned codes are reachable through their `unknown_<hex code>` names.\n\
         pub fn by_mnemonic(mnemonic: &str) -> Option<&'static Opcode> {\n    match mnemonic {\n",
    );
    for op in &isa.opcodes {
        writeln!(out, "        {:?} => Some(&OP_{}),", op.mnemonic, op.name).unwrap();
    }
    out.push_str("        _ => unknown_by_mnemonic(mnemonic),\n    }\n}\n");

    let out_path = PathBuf::from(&out_dir).join("generated.rs");
    fs::write(&out_path, out).expect("failed to write generated.rs");

    println!("cargo:rerun-if-changed={isa_yaml}");
    println!("cargo:rerun-if-changed={manifest}/build.rs");
}

fn page_index(code: u16) -> Option<usize> {
    PAGES.iter().position(|&page| code & 0xFF00 == page)
}

fn unknown_mnemonic(code: u16) -> String {
    if code > 0xFF {
        format!("unknown_{code:04x}")
    } else {
        format!("unknown_{code:02x}")
    }
}

fn opcode_expr(op: &OpcodeDef) -> String {
    let stack = match op.stack.as_deref() {
        None => "None".to_string(),
        Some("push") => "Some(StackInteraction::Push)".to_string(),
        Some("pop") => "Some(StackInteraction::Pop)".to_string(),
        Some(other) => panic!("opcode {}: unknown stack interaction {other}", op.name),
    };
    let mut flags = 0u8;
    for flag in &op.flags {
        flags |= match flag.as_str() {
            "jump" => 1,
            "conditional" => 2,
            "call" => 4,
            "return" => 8,
            other => panic!("opcode {}: unknown flag {other}", op.name),
        };
    }
    let params: Vec<String> = op.params.iter().map(|p| param_expr(&op.name, p)).collect();
    format!(
        "Opcode {{ code: {:#06x}, mnemonic: {:?}, doc: {}, params: &[{}], stack: {}, \
         flags: OpcodeFlags::from_bits_retain({:#04x}), known: {} }}",
        op.code,
        op.mnemonic,
        option_str(op.doc.as_deref()),
        params.join(", "),
        stack,
        flags,
        !op.mnemonic.starts_with("unknown_"),
    )
}

fn param_expr(opcode: &str, p: &ParamDef) -> String {
    let ty = match p.ty.as_str() {
        "any" => "ParamType::Any".to_string(),
        "byte" => "ParamType::Byte".to_string(),
        "word" => "ParamType::Word".to_string(),
        "dword" => "ParamType::DWord".to_string(),
        "float" => "ParamType::Float".to_string(),
        "label" => "ParamType::Label".to_string(),
        "ilabel" => "ParamType::ILabel".to_string(),
        "dlabel" => "ParamType::DLabel".to_string(),
        "slabel" => "ParamType::SLabel".to_string(),
        "string" => "ParamType::String".to_string(),
        "ilabel_var" => "ParamType::ILabelVar".to_string(),
        "reg_ref" => "ParamType::RegRef".to_string(),
        "reg_ref_var" => "ParamType::RegRefVar".to_string(),
        "pointer" => "ParamType::Pointer".to_string(),
        "reg_tup" => {
            let registers: Vec<String> =
                p.registers.iter().map(|r| param_expr(opcode, r)).collect();
            format!("ParamType::RegTupRef(&[{}])", registers.join(", "))
        }
        other => panic!("opcode {opcode}: unknown parameter type {other}"),
    };
    let access = match p.access.as_deref() {
        None => "None",
        Some("read") => "Some(Access::Read)",
        Some("write") => "Some(Access::Write)",
        Some("read_write") => "Some(Access::ReadWrite)",
        Some(other) => panic!("opcode {opcode}: unknown access {other}"),
    };
    format!(
        "Param {{ ty: {ty}, access: {access}, doc: {} }}",
        option_str(p.doc.as_deref())
    )
}

fn option_str(s: Option<&str>) -> String {
    match s {
        Some(s) => format!("Some({s:?})"),
        None => "None".to_string(),
    }
}
