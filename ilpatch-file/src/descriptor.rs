//! Method descriptors.

use std::collections::BTreeMap;
use std::path::Path;

use ilpatch_isa::OperandKind;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::signature::Signature;
use crate::type_name::TypeName;

/// One patched method, as published by the extractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    #[serde(alias = "Name")]
    pub name: Signature,
    #[serde(alias = "IsStatic")]
    pub is_static: bool,
    #[serde(default, alias = "Parameters")]
    pub parameters: Vec<TypeName>,
    #[serde(alias = "ReturnType")]
    pub return_type: TypeName,
    #[serde(alias = "Body")]
    pub body: MethodBody,
}

impl MethodDescriptor {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Self::from_slice(&bytes)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn returns_void(&self) -> bool {
        self.return_type.name() == Some("System.Void")
    }

    /// Argument slots: the receiver (for instance methods) then the
    /// parameters.
    pub fn arg_count(&self) -> usize {
        self.parameters.len() + usize::from(!self.is_static)
    }
}

/// The instruction stream and locals of a descriptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodBody {
    /// Advisory; never enforced.
    #[serde(default, alias = "MaxStackSize")]
    pub max_stack_size: u32,
    #[serde(default, alias = "Variables")]
    pub variables: Vec<TypeName>,
    /// Keyed by offset in the original byte stream.
    #[serde(alias = "Instructions")]
    pub instructions: BTreeMap<u32, Instruction>,
}

/// A structural defect found by [`MethodBody::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    pub offset: u32,
    pub kind: ProblemKind,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProblemKind {
    #[error("next offset {0:#x} is not an instruction")]
    DanglingNext(u32),
    #[error("branch target {0:#x} is not an instruction")]
    DanglingTarget(u32),
    #[error("operand is {found} but the opcode takes {expected}")]
    OperandMismatch {
        expected: OperandKind,
        found: OperandKind,
    },
    #[error("falls off the end of the method")]
    FallsOffEnd,
    #[error("method body is empty")]
    Empty,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.kind)
    }
}

impl MethodBody {
    /// Offset execution starts at.
    pub fn entry(&self) -> Option<u32> {
        self.instructions.keys().next().copied()
    }

    pub fn get(&self, offset: u32) -> Option<&Instruction> {
        self.instructions.get(&offset)
    }

    /// Report every dangling offset and operand shape mismatch. The body is
    /// still loadable; the interpreter fails only when a bad instruction is
    /// reached.
    pub fn validate(&self) -> Vec<Problem> {
        let mut problems = Vec::new();
        if self.instructions.is_empty() {
            problems.push(Problem {
                offset: 0,
                kind: ProblemKind::Empty,
            });
        }
        for (&offset, insn) in &self.instructions {
            let mut report = |kind| problems.push(Problem { offset, kind });

            let expected = insn.opcode.operand_kind();
            let found = insn.operand.kind();
            if expected != found {
                report(ProblemKind::OperandMismatch { expected, found });
            }
            for &target in insn.operand.targets() {
                if !self.instructions.contains_key(&target) {
                    report(ProblemKind::DanglingTarget(target));
                }
            }
            if !insn.opcode.is_terminator() {
                match insn.next_offset {
                    Some(next) if !self.instructions.contains_key(&next) => {
                        report(ProblemKind::DanglingNext(next))
                    }
                    Some(_) => {}
                    None => report(ProblemKind::FallsOffEnd),
                }
            }
        }
        problems
    }
}
