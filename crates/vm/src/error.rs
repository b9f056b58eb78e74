use crate::EmitterState;
use fxvm_core::{CompileError, LayoutError};
use thiserror::Error;

/// A program touched an input slot that has nothing bound to it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("input {register} (slot {slot}) is not bound")]
    Unbound { slot: u32, register: String },

    #[error("input {register} (slot {slot}) refers to a released uav")]
    StaleUav { slot: u32, register: String },

    #[error("slot {0} is outside of the input table")]
    InvalidSlot(u32),
}

/// Errors raised by the instruction stream itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("register r{reg} out of range at instruction {pc}")]
    RegisterOutOfRange { pc: usize, reg: u32 },

    #[error("word {offset} of input {register} out of range at instruction {pc}")]
    InputOutOfRange { pc: usize, register: String, offset: u32 },

    #[error("input {register} is read only, written at instruction {pc}")]
    ReadOnlyInput { pc: usize, register: String },

    #[error("jump to {target} outside of the program at instruction {pc}")]
    JumpOutOfRange { pc: usize, target: u32 },

    #[error("unknown extern #{id} called at instruction {pc}")]
    UnknownExtern { pc: usize, id: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Fault(#[from] Fault),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UavError {
    #[error(
        "uav `{name}` already exists as {existing_length}x{existing_stride} bytes, requested {length}x{stride} bytes"
    )]
    NameCollision {
        name: String,
        existing_stride: u32,
        existing_length: u32,
        stride: u32,
        length: u32,
    },

    #[error("uav register u{0} is outside of the input table")]
    InvalidRegister(u32),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstantError {
    #[error("program has no constant named `{0}`")]
    Unknown(String),

    #[error("constant `{name}`: {source}")]
    TypeMismatch { name: String, source: LayoutError },

    #[error("constant `{name}` at byte {offset} lies outside of the constant buffer")]
    OutOfRange { name: String, offset: u32 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmitterError {
    #[error("emitter `{name}` is {state:?}, expected it to be set up")]
    NotReady { name: String, state: EmitterState },

    #[error("emitter `{name}` needs a capacity of at least 1")]
    ZeroCapacity { name: String },

    #[error("emitter `{name}`: capacity {capacity} does not fit the signed free counter")]
    CapacityTooLarge { name: String, capacity: u32 },

    #[error("emitter `{name}`: no routine declares the `{uav}` uav")]
    MissingUav { name: String, uav: &'static str },

    #[error("emitter `{name}`: particle stride {found} does not match the particle size {expected}")]
    ParticleStride { name: String, expected: u32, found: u32 },

    #[error("emitter `{name}`: cannot copy state from `{other}` with a different layout")]
    IncompatibleState { name: String, other: String },

    #[error(transparent)]
    Uav(#[from] UavError),

    #[error(transparent)]
    Constant(#[from] ConstantError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}
