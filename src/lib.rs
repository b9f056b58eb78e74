//! A bytecode vm for effect programs, with a compute dispatch emulator, UAV resources and
//! a GPU style particle pipeline running on the cpu.
//!
//! ```
//! use fxvm::{Document, Native, evaluate};
//!
//! let document = Document::new().with("speed", 2.5f32);
//! assert_eq!(evaluate("speed * 4", &document), Ok(Native::Float(10.0)));
//! ```

// lets the derive macro name `fxvm` from inside this crate
extern crate self as fxvm;

pub use fxvm_core::*;
pub use fxvm_vm::*;

#[cfg(feature = "derive")]
pub use fxvm_derive::FxType;
