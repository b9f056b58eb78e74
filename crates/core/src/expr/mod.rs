//! A small expression compiler used to evaluate literal expressions on the vm.
//!
//! Expressions support `int`, `uint`, `float` and `bool` literals, named constants from a
//! [`Document`], unary `-` and `!`, the binary arithmetic, comparison and logical operators,
//! the ternary operator and the builtins `sin cos abs sqrt floor ceil frac min max` plus the
//! `float int uint bool` casts.

mod lowering;
mod parse;

use crate::{CompileError, Native, Program};
use bumpalo::Bump;

pub use lowering::MAX_TREE_DEPTH;
pub use parse::{BinaryOp, Expr, MAX_NESTING, Parser, UnaryOp};

/// Named constants an expression can refer to.
///
/// Each referenced constant becomes an entry of the program's constant buffer,
/// so it can be overridden later without recompiling.
#[derive(Clone, Debug, Default)]
pub struct Document {
    constants: Vec<(String, Native)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Native>) -> Self {
        self.define(name, value);
        self
    }

    /// Define or replace a constant.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<Native>) {
        let name = name.into();
        let value = value.into();
        match self.constants.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.constants.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Native> {
        self.constants.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Native)> {
        self.constants.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Compile a single expression into a program returning its value in register 0.
pub fn compile(source: &str, document: &Document) -> Result<Program, CompileError> {
    let arena = Bump::new();
    let expr = Parser::parse(&arena, source)?;
    lowering::lower(expr, document)
}
