pub mod bytecode;
mod builder;
mod data;
mod error;
pub mod expr;
mod layout;
mod program;

pub use builder::{Label, ProgramBuilder};
pub use bytecode::{Reg, Slot, VMOp};
pub use data::*;
pub use error::*;
pub use expr::{Document, compile};
pub use layout::*;
pub use program::*;
