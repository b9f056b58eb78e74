use crate::bytecode::ChunkType;
use thiserror::Error;

/// Errors produced while decoding a bytecode container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("truncated {what}: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("missing {0:?} chunk")]
    MissingChunk(ChunkType),

    #[error("code chunk length {0} is not a multiple of the instruction size")]
    MisalignedCode(usize),

    #[error("invalid opcode {opcode} at instruction {pc}")]
    InvalidOpcode { pc: usize, opcode: u32 },

    #[error("invalid utf-8 string in {0}")]
    InvalidString(&'static str),

    #[error("constant `{name}` spans bytes {offset}..{end}, the constant buffer holds {available}")]
    ConstantOutOfRange {
        name: String,
        offset: u32,
        end: u64,
        available: usize,
    },

    #[error("constant `{name}` is {found} bytes, its type needs {expected}")]
    ConstantSize { name: String, expected: u32, found: u32 },

    #[error("extern #{id} is outside of the table of {count} externs")]
    ExternId { id: u32, count: u32 },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Errors produced when converting between raw bytes and native values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("buffer too short for `{ty}`: needed {needed} bytes, {available} available")]
    ShortBuffer {
        ty: String,
        needed: usize,
        available: usize,
    },

    #[error("value of kind `{found}` does not fit type `{expected}`")]
    Mismatch { expected: String, found: &'static str },

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("type `{ty}` declares {size} bytes, its contents need {expected}")]
    InvalidSize { ty: String, size: u32, expected: u64 },

    #[error("type `{ty}` has field `{field}` outside of its {size} bytes")]
    FieldOutOfRange { ty: String, field: String, size: u32 },

    #[error("array `{0}` has a zero sized element type")]
    EmptyElement(String),

    #[error("type nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// Errors produced by the expression compiler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("expression is too complex: ran out of registers")]
    TooManyRegisters,

    #[error("expression tree is deeper than {0} levels")]
    TooDeep(usize),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}
