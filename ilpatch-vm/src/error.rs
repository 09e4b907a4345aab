use ilpatch_isa::Opcode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unresolved symbol '{0}'")]
    Resolution(String),

    #[error("Operator '{op}' is not defined between {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("Division by zero")]
    DivideByZero,

    #[error("Arithmetic overflow in '{0}'")]
    Overflow(&'static str),

    #[error("Unrecognized opcode {opcode} at IL_{offset:04x}")]
    UnrecognizedOpcode { opcode: Opcode, offset: u32 },

    #[error("Method '{0}' is marked patched but has no descriptor")]
    MissingDescriptor(String),

    #[error("Malformed descriptor '{method}' at IL_{offset:04x}: {reason}")]
    MalformedDescriptor {
        method: String,
        offset: u32,
        reason: String,
    },

    #[error("Stack underflow in '{method}' at IL_{offset:04x}")]
    StackUnderflow { method: String, offset: u32 },

    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("Null reference in '{0}'")]
    NullReference(&'static str),

    #[error("Index {index} is out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Native call failed: {0}")]
    Native(String),

    #[error("Unhandled exception: {0}")]
    Thrown(String),

    #[error("Catalogue load failed: {0}")]
    Load(String),

    #[error("Duplicate signature '{0}'")]
    DuplicateSignature(String),

    #[error(transparent)]
    File(#[from] ilpatch_file::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
