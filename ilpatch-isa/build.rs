use std::collections::HashSet;
use std::env;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize)]
struct Isa {
    opcodes: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    mnemonic: String,
    value: u16,
    #[serde(default)]
    operand: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

fn main() {
    let manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let isa_yaml = format!("{manifest}/isa.yaml");
    println!("cargo:rerun-if-changed={isa_yaml}");

    let text = std::fs::read_to_string(&isa_yaml).expect("failed to read isa.yaml");
    let isa: Isa = serde_yaml::from_str(&text).expect("failed to parse isa.yaml");

    let mut variants = HashSet::new();
    let mut values = HashSet::new();
    let mut names = HashSet::new();
    for entry in &isa.opcodes {
        let variant = variant_name(&entry.mnemonic);
        assert!(variants.insert(variant.clone()), "duplicate variant {variant}");
        assert!(
            values.insert(entry.value),
            "duplicate encoding {:#x} for '{}'",
            entry.value,
            entry.mnemonic
        );
        for name in std::iter::once(&entry.mnemonic).chain(&entry.aliases) {
            assert!(
                names.insert(normalize(name)),
                "name '{name}' collides after normalization"
            );
        }
    }

    let mut out = String::new();
    out.push_str("/// A CIL opcode.\n");
    out.push_str("#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]\n");
    out.push_str("#[repr(u16)]\n");
    out.push_str("pub enum Opcode {\n");
    for entry in &isa.opcodes {
        writeln!(out, "    /// `{}`", entry.mnemonic).unwrap();
        writeln!(out, "    {},", variant_name(&entry.mnemonic)).unwrap();
    }
    out.push_str("}\n\n");

    out.push_str("impl Opcode {\n");
    out.push_str("    /// Every opcode, in extractor code order.\n");
    writeln!(out, "    pub const ALL: [Opcode; {}] = [", isa.opcodes.len()).unwrap();
    for entry in &isa.opcodes {
        writeln!(out, "        Opcode::{},", variant_name(&entry.mnemonic)).unwrap();
    }
    out.push_str("    ];\n\n");

    emit_match(&mut out, "mnemonic", "&'static str", &isa, |e| {
        format!("{:?}", e.mnemonic)
    });
    emit_match(&mut out, "raw", "u16", &isa, |e| format!("{:#06x}", e.value));
    emit_match(&mut out, "operand_kind", "OperandKind", &isa, |e| {
        format!("OperandKind::{}", operand_variant(e.operand.as_deref()))
    });
    emit_match(&mut out, "flags", "OpcodeFlags", &isa, |e| {
        let mut expr = String::from("OpcodeFlags::empty()");
        for flag in &e.flags {
            write!(expr, ".union(OpcodeFlags::{})", flag_const(flag)).unwrap();
        }
        expr
    });

    out.push_str("    fn lookup_normalized(name: &str) -> Option<Opcode> {\n");
    out.push_str("        match name {\n");
    for entry in &isa.opcodes {
        let variant = variant_name(&entry.mnemonic);
        for name in std::iter::once(&entry.mnemonic).chain(&entry.aliases) {
            writeln!(
                out,
                "            {:?} => Some(Opcode::{variant}),",
                normalize(name)
            )
            .unwrap();
        }
    }
    out.push_str("            _ => None,\n");
    out.push_str("        }\n");
    out.push_str("    }\n\n");

    out.push_str("    fn lookup_raw(raw: u16) -> Option<Opcode> {\n");
    out.push_str("        match raw {\n");
    for entry in &isa.opcodes {
        writeln!(
            out,
            "            {:#06x} => Some(Opcode::{}),",
            entry.value,
            variant_name(&entry.mnemonic)
        )
        .unwrap();
    }
    out.push_str("            _ => None,\n");
    out.push_str("        }\n");
    out.push_str("    }\n");
    out.push_str("}\n");

    let out_path = PathBuf::from(&out_dir).join("opcodes.rs");
    std::fs::write(&out_path, out).expect("failed to write opcodes.rs");
}

fn emit_match(
    out: &mut String,
    name: &str,
    ret: &str,
    isa: &Isa,
    arm: impl Fn(&Entry) -> String,
) {
    writeln!(out, "    pub const fn {name}(self) -> {ret} {{").unwrap();
    out.push_str("        match self {\n");
    for entry in &isa.opcodes {
        writeln!(
            out,
            "            Opcode::{} => {},",
            variant_name(&entry.mnemonic),
            arm(entry)
        )
        .unwrap();
    }
    out.push_str("        }\n");
    out.push_str("    }\n\n");
}

/// `ldc.i4.m1` -> `LdcI4M1`, `unaligned.` -> `Unaligned`.
fn variant_name(mnemonic: &str) -> String {
    mnemonic
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Lookup key: lowercase, `_` read as `.`, trailing `.` dropped.
fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
        .replace('_', ".")
        .trim_end_matches('.')
        .to_string()
}

fn operand_variant(operand: Option<&str>) -> &'static str {
    match operand {
        None | Some("none") => "None",
        Some("int") => "Int",
        Some("float") => "Float",
        Some("string") => "String",
        Some("method") => "Method",
        Some("type") => "Type",
        Some("field") => "Field",
        Some("token") => "Token",
        Some("target") => "Target",
        Some("targets") => "Targets",
        Some("variable") => "Variable",
        Some("signature") => "Signature",
        Some(other) => panic!("unknown operand kind '{other}'"),
    }
}

fn flag_const(flag: &str) -> &'static str {
    match flag {
        "jump" => "JUMP",
        "conditional" => "CONDITIONAL",
        "switch" => "SWITCH",
        "return" => "RETURN",
        "call" => "CALL",
        "throw" => "THROW",
        "terminator" => "TERMINATOR",
        other => panic!("unknown opcode flag '{other}'"),
    }
}
