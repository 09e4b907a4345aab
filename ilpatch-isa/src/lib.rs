//! CIL opcode definitions, generated from `isa.yaml`.
//!
//! This crate names every opcode the patch extractor can emit, together with
//! the kind of operand it carries and the control-flow flags the interpreter
//! and the verifier care about.

use std::fmt;
use std::str::FromStr;

pub use bitflags;

bitflags::bitflags! {
    /// Control-flow properties of an opcode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u8 {
        /// Carries one or more branch targets.
        const JUMP = 1 << 0;
        /// Falls through when the branch is not taken.
        const CONDITIONAL = 1 << 1;
        /// Multi-way branch over a target table.
        const SWITCH = 1 << 2;
        /// Leaves the method with the top of stack (if any).
        const RETURN = 1 << 3;
        /// Invokes a method.
        const CALL = 1 << 4;
        /// Raises an exception.
        const THROW = 1 << 5;
        /// Never falls through to the next instruction.
        const TERMINATOR = 1 << 6;
    }
}

/// The shape of an instruction's operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    /// Integer literal (`ldc.i4`, `ldc.i8`, `ldc.i4.s`).
    Int,
    /// Floating point literal (`ldc.r4`, `ldc.r8`).
    Float,
    /// String literal (`ldstr`).
    String,
    /// Method reference, as a full method name.
    Method,
    /// Type reference, as a full type name.
    Type,
    /// Field reference, as a full field name.
    Field,
    /// Metadata token (`ldtoken`): a type, method or field name.
    Token,
    /// Single branch target offset.
    Target,
    /// Switch target table.
    Targets,
    /// Argument or local index.
    Variable,
    /// Call-site signature (`calli`).
    Signature,
}

impl OperandKind {
    /// Name used in the descriptor wire format.
    pub const fn name(self) -> &'static str {
        match self {
            OperandKind::None => "None",
            OperandKind::Int => "Int",
            OperandKind::Float => "Float",
            OperandKind::String => "String",
            OperandKind::Method => "Method",
            OperandKind::Type => "Type",
            OperandKind::Field => "Field",
            OperandKind::Token => "Token",
            OperandKind::Target => "Instruction",
            OperandKind::Targets => "Instructions",
            OperandKind::Variable => "Variable",
            OperandKind::Signature => "Signature",
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

include!(concat!(env!("OUT_DIR"), "/opcodes.rs"));

/// Error from [`Opcode::from_name`] and friends.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UnknownOpcode {
    #[error("unknown opcode name '{0}'")]
    Name(String),
    #[error("unknown opcode code {0}")]
    Code(u16),
}

impl Opcode {
    /// Look up an opcode by mnemonic.
    ///
    /// Accepts the ECMA-335 spelling (`ldc.i4.m1`, `unaligned.`) as well as
    /// the enum-style spelling (`Ldc_I4_M1`, `Unaligned`).
    pub fn from_name(name: &str) -> Result<Opcode, UnknownOpcode> {
        let key = name
            .to_ascii_lowercase()
            .replace('_', ".");
        Opcode::lookup_normalized(key.trim_end_matches('.'))
            .ok_or_else(|| UnknownOpcode::Name(name.to_string()))
    }

    /// Look up an opcode by its position in the extractor's enumeration.
    pub fn from_code(code: u16) -> Result<Opcode, UnknownOpcode> {
        Opcode::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(UnknownOpcode::Code(code))
    }

    /// Look up an opcode by its byte-stream encoding (`0xfe01` for `ceq`).
    pub fn from_raw(raw: u16) -> Option<Opcode> {
        Opcode::lookup_raw(raw)
    }

    /// Position in the extractor's enumeration.
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub const fn is_jump(self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP)
    }

    pub const fn is_conditional(self) -> bool {
        self.flags().contains(OpcodeFlags::CONDITIONAL)
    }

    pub const fn is_switch(self) -> bool {
        self.flags().contains(OpcodeFlags::SWITCH)
    }

    pub const fn is_return(self) -> bool {
        self.flags().contains(OpcodeFlags::RETURN)
    }

    pub const fn is_call(self) -> bool {
        self.flags().contains(OpcodeFlags::CALL)
    }

    pub const fn is_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::THROW)
    }

    /// Whether execution can never fall through to the next instruction.
    pub const fn is_terminator(self) -> bool {
        self.flags().contains(OpcodeFlags::TERMINATOR)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = UnknownOpcode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_follow_mnemonics() {
        assert_eq!(Opcode::LdcI4M1.mnemonic(), "ldc.i4.m1");
        assert_eq!(Opcode::BneUnS.mnemonic(), "bne.un.s");
        assert_eq!(Opcode::Unaligned.mnemonic(), "unaligned.");
    }

    #[test]
    fn enum_style_names_resolve() {
        assert_eq!(Opcode::from_name("Ldc_I4_M1"), Ok(Opcode::LdcI4M1));
        assert_eq!(Opcode::from_name("Unbox_Any"), Ok(Opcode::UnboxAny));
        assert_eq!(Opcode::from_name("Ldelem_Any"), Ok(Opcode::Ldelem));
        assert_eq!(Opcode::from_name("Constrained"), Ok(Opcode::Constrained));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = Opcode::from_name("ldc.i4.9").unwrap_err();
        assert_eq!(err, UnknownOpcode::Name("ldc.i4.9".into()));
        assert_eq!(err.to_string(), "unknown opcode name 'ldc.i4.9'");
    }

    #[test]
    fn codes_follow_table_order() {
        assert_eq!(Opcode::from_code(0), Ok(Opcode::Nop));
        assert_eq!(Opcode::from_code(2), Ok(Opcode::Ldarg0));
        assert_eq!(Opcode::Ret.code(), 41);
        assert_eq!(Opcode::Ceq.code(), 192);
        assert!(Opcode::from_code(u16::MAX).is_err());
    }
}
