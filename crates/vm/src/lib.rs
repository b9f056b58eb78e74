mod bundle;
mod dispatch;
mod error;
mod memory;
mod native;
pub mod pipeline;
mod runtime;
mod timeline;
mod uav;
mod vm;

pub use bundle::*;
pub use dispatch::*;
pub use error::*;
pub use memory::Memory;
pub use native::*;
pub use pipeline::{EmitReport, Emitter, EmitterDesc, EmitterState, MAX_CAPACITY};
pub use runtime::Runtime;
pub use timeline::*;
pub use uav::*;
pub use vm::{Vm, Word};
