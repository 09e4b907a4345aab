//! Patch descriptor format.
//!
//! A descriptor captures the instruction-level body of one method so it can
//! be interpreted in place of the shipped code. This crate holds the data
//! model, its JSON encoding, the catalogue manifest and the textual grammar
//! shared by type names, method signatures and field references.

pub mod descriptor;
pub mod error;
pub mod instruction;
pub mod manifest;
pub mod signature;
pub mod type_name;

pub use descriptor::{MethodBody, MethodDescriptor, Problem, ProblemKind};
pub use error::{Error, Result};
pub use instruction::{Instruction, Operand};
pub use manifest::{Manifest, ManifestEntry, content_key, verify_content_key};
pub use signature::{FieldRef, MethodRef, Signature};
pub use type_name::TypeName;

pub use ilpatch_isa::{Opcode, OperandKind};
