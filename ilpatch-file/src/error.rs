use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    UnknownOpcode(#[from] ilpatch_isa::UnknownOpcode),

    #[error("Invalid operand for {opcode}: {reason}")]
    InvalidOperand {
        opcode: ilpatch_isa::Opcode,
        reason: String,
    },

    #[error("Unknown operand type '{0}'")]
    UnknownOperandType(String),

    #[error("Invalid signature '{text}': {reason}")]
    InvalidSignature { text: String, reason: String },

    #[error("Invalid type name '{text}' at column {column}: {reason}")]
    InvalidTypeName {
        text: String,
        column: usize,
        reason: String,
    },

    #[error("Placeholder {0} has no binding")]
    UnboundPlaceholder(String),

    #[error("Content key mismatch for '{key}': content hashes to {actual}")]
    DigestMismatch { key: String, actual: String },
}

pub type Result<T> = std::result::Result<T, Error>;
