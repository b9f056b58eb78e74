use crate::{EvalError, Runtime};
use fxvm_core::{Document, Native, Program, compile};
use std::sync::Arc;

/// Compile `source` against `document`, run it once and decode its value.
///
/// ```
/// # use fxvm_vm::evaluate;
/// # use fxvm_core::{Document, Native};
/// assert_eq!(evaluate("2 + 2", &Document::new()), Ok(Native::Int(4)));
/// ```
pub fn evaluate(source: &str, document: &Document) -> Result<Native, EvalError> {
    let program = compile(source, document)?;
    as_native_function(Arc::new(program))()
}

/// Wrap a program into a host closure returning its decoded result.
///
/// The closure owns a private runtime, so calls never observe each other except through
/// the register file, which is not cleared between calls.
pub fn as_native_function(program: Arc<Program>) -> impl FnMut() -> Result<Native, EvalError> {
    let mut runtime = Runtime::new();
    let mut bundle = runtime.load(program);
    move || {
        runtime.play(&mut bundle)?;
        Ok(runtime.result(&bundle)?)
    }
}
