//! Instructions and their JSON encoding.
//!
//! The extractor writes each instruction as
//! `{"code": ..., "operandType": ..., "operand": ..., "nextOffset": ...}`.
//! `code` is either a mnemonic (`ldc.i4.m1`, `Ldc_I4_M1`) or the opcode's
//! position in the extractor's enumeration. The operand is decoded by the
//! opcode's [`OperandKind`]; `operandType` is informational, since the
//! extractor tags parameter indices as `Int` and fields as `Variable`.

use std::fmt;

use ilpatch_isa::{Opcode, OperandKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// A decoded operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    Int(i64),
    Float(f64),
    String(String),
    /// Full method reference text.
    Method(String),
    /// Type name text.
    Type(String),
    /// Full field reference text.
    Field(String),
    /// Type, method or field name.
    Token(String),
    /// Branch target offset.
    Target(u32),
    /// Switch target offsets.
    Targets(Vec<u32>),
    /// Argument or local slot.
    Variable(u16),
    /// Call-site signature text.
    Signature(String),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Int(_) => OperandKind::Int,
            Operand::Float(_) => OperandKind::Float,
            Operand::String(_) => OperandKind::String,
            Operand::Method(_) => OperandKind::Method,
            Operand::Type(_) => OperandKind::Type,
            Operand::Field(_) => OperandKind::Field,
            Operand::Token(_) => OperandKind::Token,
            Operand::Target(_) => OperandKind::Target,
            Operand::Targets(_) => OperandKind::Targets,
            Operand::Variable(_) => OperandKind::Variable,
            Operand::Signature(_) => OperandKind::Signature,
        }
    }

    /// Offsets this operand can transfer control to.
    pub fn targets(&self) -> &[u32] {
        match self {
            Operand::Target(target) => std::slice::from_ref(target),
            Operand::Targets(targets) => targets,
            _ => &[],
        }
    }

    fn decode(opcode: Opcode, raw: Json) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidOperand {
            opcode,
            reason: reason.to_string(),
        };
        let text = |raw: Json| match raw {
            Json::String(s) => Ok(s),
            _ => Err(invalid("expected a string")),
        };
        Ok(match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Int => Operand::Int(
                integer(&raw).ok_or_else(|| invalid("expected an integer"))?,
            ),
            OperandKind::Float => match &raw {
                Json::Number(n) => n
                    .as_f64()
                    .map(Operand::Float)
                    .ok_or_else(|| invalid("expected a number"))?,
                Json::String(s) => s
                    .parse()
                    .map(Operand::Float)
                    .map_err(|_| invalid("expected a number"))?,
                _ => return Err(invalid("expected a number")),
            },
            OperandKind::String => Operand::String(text(raw)?),
            OperandKind::Method => Operand::Method(text(raw)?),
            OperandKind::Type => Operand::Type(text(raw)?),
            OperandKind::Field => Operand::Field(text(raw)?),
            OperandKind::Token => Operand::Token(text(raw)?),
            OperandKind::Signature => Operand::Signature(text(raw)?),
            OperandKind::Target => Operand::Target(
                integer(&raw)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| invalid("expected a branch offset"))?,
            ),
            OperandKind::Targets => {
                // Either an array or a string holding one.
                let list = match raw {
                    Json::String(s) => serde_json::from_str(&s)?,
                    other => other,
                };
                let Json::Array(items) = list else {
                    return Err(invalid("expected a list of branch offsets"));
                };
                let targets = items
                    .iter()
                    .map(|item| integer(item).and_then(|n| u32::try_from(n).ok()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| invalid("expected a list of branch offsets"))?;
                Operand::Targets(targets)
            }
            OperandKind::Variable => Operand::Variable(
                integer(&raw)
                    .and_then(|n| u16::try_from(n).ok())
                    .ok_or_else(|| invalid("expected a slot index"))?,
            ),
        })
    }

    fn encode(&self) -> Json {
        match self {
            Operand::None => Json::Null,
            Operand::Int(n) => Json::from(*n),
            Operand::Float(x) => Json::from(*x),
            Operand::String(s)
            | Operand::Method(s)
            | Operand::Type(s)
            | Operand::Field(s)
            | Operand::Token(s)
            | Operand::Signature(s) => Json::from(s.as_str()),
            Operand::Target(target) => Json::from(*target),
            Operand::Targets(targets) => Json::from(targets.clone()),
            Operand::Variable(slot) => Json::from(*slot),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(n) => write!(f, "{n}"),
            Operand::Float(x) => write!(f, "{x}"),
            Operand::String(s) => write!(f, "{s:?}"),
            Operand::Method(s)
            | Operand::Type(s)
            | Operand::Field(s)
            | Operand::Token(s)
            | Operand::Signature(s) => f.write_str(s),
            Operand::Target(target) => write!(f, "IL_{target:04x}"),
            Operand::Targets(targets) => {
                f.write_str("(")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{target:04x}")?;
                }
                f.write_str(")")
            }
            Operand::Variable(slot) => write!(f, "{slot}"),
        }
    }
}

fn integer(raw: &Json) -> Option<i64> {
    match raw {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// One instruction of a method body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInstruction", into = "RawInstruction")]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    /// Offset of the straight-line successor, if any.
    pub next_offset: Option<u32>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: Operand, next_offset: Option<u32>) -> Self {
        Self {
            opcode,
            operand,
            next_offset,
        }
    }

    /// An instruction with no operand.
    pub fn simple(opcode: Opcode, next_offset: Option<u32>) -> Self {
        Self::new(opcode, Operand::None, next_offset)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            ref operand => write!(f, "{} {operand}", self.opcode),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Name(String),
    Code(u16),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawOperandType {
    Name(String),
    Code(u8),
}

/// Extractor operand type tags, in the extractor's enumeration order.
/// Fields travel as `Variable`, tokens as `Type`, anything else as `Other`.
const OPERAND_TYPES: [&str; 10] = [
    "None",
    "Int",
    "Float",
    "String",
    "Method",
    "Type",
    "Instruction",
    "Instructions",
    "Variable",
    "Other",
];

/// The extractor's tag for an operand of `kind`.
fn wire_tag(kind: OperandKind) -> &'static str {
    match kind {
        OperandKind::Field => "Variable",
        OperandKind::Token => "Type",
        OperandKind::Signature => "Other",
        other => other.name(),
    }
}

impl RawOperandType {
    fn check(&self) -> Result<()> {
        let known = match self {
            RawOperandType::Name(name) => {
                OPERAND_TYPES.contains(&name.as_str())
            }
            RawOperandType::Code(code) => usize::from(*code) < OPERAND_TYPES.len(),
        };
        if known {
            Ok(())
        } else {
            Err(Error::UnknownOperandType(match self {
                RawOperandType::Name(name) => name.clone(),
                RawOperandType::Code(code) => code.to_string(),
            }))
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstruction {
    #[serde(alias = "Code")]
    code: RawCode,
    #[serde(default, alias = "OperandType", skip_serializing_if = "Option::is_none")]
    operand_type: Option<RawOperandType>,
    #[serde(default, alias = "Operand")]
    operand: Json,
    #[serde(default, alias = "NextOffset", skip_serializing_if = "Option::is_none")]
    next_offset: Option<u32>,
}

impl TryFrom<RawInstruction> for Instruction {
    type Error = Error;

    fn try_from(raw: RawInstruction) -> Result<Self> {
        let opcode = match &raw.code {
            RawCode::Name(name) => Opcode::from_name(name)?,
            RawCode::Code(code) => Opcode::from_code(*code)?,
        };
        if let Some(operand_type) = &raw.operand_type {
            operand_type.check()?;
        }
        Ok(Self {
            opcode,
            operand: Operand::decode(opcode, raw.operand)?,
            next_offset: raw.next_offset,
        })
    }
}

impl From<Instruction> for RawInstruction {
    fn from(insn: Instruction) -> Self {
        let kind = insn.operand.kind();
        Self {
            code: RawCode::Name(insn.opcode.mnemonic().to_string()),
            operand_type: (kind != OperandKind::None)
                .then(|| RawOperandType::Name(wire_tag(kind).to_string())),
            operand: insn.operand.encode(),
            next_offset: insn.next_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<Instruction> {
        Ok(serde_json::from_str(json)?)
    }

    #[test]
    fn enum_style_code_and_pascal_case_fields() {
        let insn = decode(r#"{"Code":"Ldc_I4_S","OperandType":"Int","Operand":-3,"NextOffset":2}"#)
            .unwrap();
        assert_eq!(insn.opcode, Opcode::LdcI4S);
        assert_eq!(insn.operand, Operand::Int(-3));
        assert_eq!(insn.next_offset, Some(2));
    }

    #[test]
    fn integer_code_is_enumeration_position() {
        let insn = decode(r#"{"code":87,"operandType":0}"#).unwrap();
        assert_eq!(insn.opcode, Opcode::Add);
        assert_eq!(insn.next_offset, None);
    }

    #[test]
    fn switch_targets_as_string_or_array() {
        let a = decode(r#"{"code":"switch","operandType":"Instructions","operand":"[8,12,16]","nextOffset":5}"#)
            .unwrap();
        let b = decode(r#"{"code":"switch","operandType":"Instructions","operand":[8,12,16],"nextOffset":5}"#)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.operand.targets(), &[8, 12, 16]);
    }

    #[test]
    fn field_tagged_as_variable_decodes_by_opcode() {
        let insn = decode(
            r#"{"code":"ldfld","operandType":"Variable","operand":"System.Int32 Game.Counter::count","nextOffset":6}"#,
        )
        .unwrap();
        assert_eq!(
            insn.operand,
            Operand::Field("System.Int32 Game.Counter::count".into())
        );
    }

    #[test]
    fn operand_types_outside_the_extractor_set_fail() {
        let err = decode(r#"{"code":"ldfld","operandType":"Field","operand":"System.Int32 Game.Counter::count"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown operand type 'Field'"), "got {err}");
        let err = decode(r#"{"code":"add","operandType":10}"#).unwrap_err();
        assert!(err.to_string().contains("Unknown operand type '10'"), "got {err}");
        decode(r#"{"code":"calli","operandType":9,"operand":"System.Void()"}"#).unwrap();
    }

    #[test]
    fn fields_and_tokens_are_written_with_extractor_tags() {
        let field = Instruction::new(
            Opcode::Ldfld,
            Operand::Field("System.Int32 Game.Counter::count".into()),
            Some(6),
        );
        let token = Instruction::new(Opcode::Ldtoken, Operand::Token("Game.Player".into()), Some(5));
        let json = serde_json::to_value([&field, &token]).unwrap();
        assert_eq!(json[0]["operandType"], "Variable");
        assert_eq!(json[1]["operandType"], "Type");
        let back: Vec<Instruction> = serde_json::from_value(json).unwrap();
        assert_eq!(back, [field, token]);
    }

    #[test]
    fn unknown_opcode_name_fails() {
        let err = decode(r#"{"code":"frobnicate"}"#).unwrap_err();
        assert!(err.to_string().contains("frobnicate"), "got {err}");
    }

    #[test]
    fn wrong_operand_shape_fails() {
        let err = decode(r#"{"code":"br.s","operandType":"Instruction","operand":"later"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("branch offset"), "got {err}");
    }

    #[test]
    fn display_listing() {
        let insn = Instruction::new(Opcode::BrS, Operand::Target(0x1a), None);
        assert_eq!(insn.to_string(), "br.s IL_001a");
        let insn = Instruction::new(Opcode::Ldstr, Operand::String("hi".into()), Some(5));
        assert_eq!(insn.to_string(), "ldstr \"hi\"");
    }
}
