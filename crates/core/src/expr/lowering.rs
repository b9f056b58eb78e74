use super::Document;
use super::parse::{BinaryOp, Expr, UnaryOp};
use crate::bytecode::{Reg, VMOp};
use crate::{CBUFFER0_REGISTER, CompileError, Native, Program, ProgramBuilder, ScalarType, TypeLayout};

#[derive(Clone, Copy, Debug)]
struct Value {
    reg: Reg,
    ty: ScalarType,
}

/// Deepest expression tree accepted by the lowering; long operator chains nest on the left.
pub const MAX_TREE_DEPTH: usize = 512;

struct Lowering<'d> {
    builder: ProgramBuilder,
    document: &'d Document,
    constants: Vec<(String, Value)>,
    depth: usize,
}

pub fn lower(expr: &Expr, document: &Document) -> Result<Program, CompileError> {
    let mut lowering = Lowering {
        // every expression is a scalar, the exact type is fixed once it is known
        builder: ProgramBuilder::new(TypeLayout::scalar(ScalarType::Int)),
        document,
        constants: Vec::new(),
        depth: 0,
    };

    let value = lowering.expr(expr)?;
    let mut builder = lowering.builder;
    let result = builder.result();
    builder.push(VMOp::Mov(value.reg, result)).push(VMOp::Ret);
    builder.set_result(TypeLayout::scalar(value.ty))?;
    builder.finish()
}

fn type_error(message: impl Into<String>) -> CompileError {
    CompileError::Type(message.into())
}

impl Lowering<'_> {
    fn expr(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        if self.depth >= MAX_TREE_DEPTH {
            return Err(CompileError::TooDeep(MAX_TREE_DEPTH));
        }

        self.depth += 1;
        let value = self.node(expr);
        self.depth -= 1;
        value
    }

    fn node(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        Ok(match *expr {
            Expr::Bool(x) => Value {
                reg: self.builder.lit_i(x as i32),
                ty: ScalarType::Bool,
            },
            Expr::Int(x) => Value {
                reg: self.builder.lit_i(x),
                ty: ScalarType::Int,
            },
            Expr::Uint(x) => Value {
                reg: self.builder.lit_u(x),
                ty: ScalarType::Uint,
            },
            Expr::Float(x) => Value {
                reg: self.builder.lit_f(x),
                ty: ScalarType::Float,
            },
            Expr::Ident(name) => self.constant(name)?,
            Expr::Unary(op, a) => {
                let a = self.expr(a)?;
                self.unary(op, a)?
            }
            Expr::Binary(op, a, b) => {
                let a = self.expr(a)?;
                let b = self.expr(b)?;
                self.binary(op, a, b)?
            }
            Expr::Ternary(cond, a, b) => {
                let cond = self.expr(cond)?;
                if cond.ty != ScalarType::Bool {
                    return Err(type_error(format!("ternary condition must be bool, got {}", cond.ty.name())));
                }

                // expressions have no side effects, so both arms are evaluated
                let a = self.expr(a)?;
                let b = self.expr(b)?;
                let (a, b) = self.unify(a, b)?;
                let dst = self.builder.reg();
                self.builder.select(cond.reg, a.reg, b.reg, dst);
                Value { reg: dst, ty: a.ty }
            }
            Expr::Call(name, args) => {
                let args = args.iter().map(|a| self.expr(a)).collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)?
            }
        })
    }

    fn constant(&mut self, name: &str) -> Result<Value, CompileError> {
        let value = match self.constants.iter().find(|(n, _)| n == name) {
            Some((_, value)) => *value,
            None => {
                let native = self
                    .document
                    .get(name)
                    .ok_or_else(|| CompileError::UnknownIdentifier(name.to_string()))?;

                let ty = match native {
                    Native::Bool(_) => ScalarType::Bool,
                    Native::Int(_) => ScalarType::Int,
                    Native::Uint(_) => ScalarType::Uint,
                    Native::Float(_) => ScalarType::Float,
                    other => {
                        return Err(type_error(format!(
                            "constant `{name}` is a {}, only scalars are supported",
                            other.kind_name()
                        )));
                    }
                };

                let offset = self.builder.constant(name, TypeLayout::scalar(ty), native)?;
                let value = Value { reg: offset, ty };
                self.constants.push((name.to_string(), value));
                value
            }
        };

        // the cached value holds the constant's word offset
        Ok(Value {
            reg: self.builder.load(CBUFFER0_REGISTER, value.reg),
            ty: value.ty,
        })
    }

    fn op(&mut self, ty: ScalarType, f: impl FnOnce(Reg) -> VMOp) -> Value {
        let dst = self.builder.reg();
        self.builder.push(f(dst));
        Value { reg: dst, ty }
    }

    fn convert(&mut self, value: Value, to: ScalarType) -> Value {
        use ScalarType::*;

        let a = value.reg;
        match (value.ty, to) {
            (from, to) if from == to => value,
            (Int | Uint | Bool, Int | Uint) => Value { reg: a, ty: to },
            (Int, Float) => self.op(Float, |dst| VMOp::I32ToF32(a, dst)),
            (Uint | Bool, Float) => self.op(Float, |dst| VMOp::U32ToF32(a, dst)),
            (Float, Int) => self.op(Int, |dst| VMOp::F32ToI32(a, dst)),
            (Float, Uint) => self.op(Uint, |dst| VMOp::F32ToU32(a, dst)),
            (Float, Bool) => {
                let zero = self.builder.lit_f(0.0);
                self.op(Bool, |dst| VMOp::NeF(a, zero, dst))
            }
            (Int | Uint, Bool) => {
                let zero = self.builder.lit_i(0);
                self.op(Bool, |dst| VMOp::NeI(a, zero, dst))
            }
            (_, _) => value,
        }
    }

    /// Bring both operands to a common type: float wins over uint, uint wins over int.
    fn unify(&mut self, a: Value, b: Value) -> Result<(Value, Value), CompileError> {
        use ScalarType::*;

        let ty = match (a.ty, b.ty) {
            (x, y) if x == y => x,
            (Bool, other) | (other, Bool) => {
                return Err(type_error(format!("cannot mix bool and {}", other.name())));
            }
            (Float, _) | (_, Float) => Float,
            _ => Uint,
        };

        Ok((self.convert(a, ty), self.convert(b, ty)))
    }

    fn unary(&mut self, op: UnaryOp, a: Value) -> Result<Value, CompileError> {
        let reg = a.reg;
        match (op, a.ty) {
            (UnaryOp::Neg, ScalarType::Float) => Ok(self.op(a.ty, |dst| VMOp::NegF(reg, dst))),
            (UnaryOp::Neg, ScalarType::Int | ScalarType::Uint) => Ok(self.op(a.ty, |dst| VMOp::NegI(reg, dst))),
            (UnaryOp::Not, ScalarType::Bool) => Ok(self.op(a.ty, |dst| VMOp::NotI(reg, dst))),
            (op, ty) => Err(type_error(format!("operator {op:?} is not defined for {}", ty.name()))),
        }
    }

    fn binary(&mut self, op: BinaryOp, a: Value, b: Value) -> Result<Value, CompileError> {
        use BinaryOp::*;
        use ScalarType::{Bool, Float, Int, Uint};

        if matches!(op, And | Or) {
            if a.ty != Bool || b.ty != Bool {
                return Err(type_error(format!(
                    "operator {op:?} expects bool operands, got {} and {}",
                    a.ty.name(),
                    b.ty.name()
                )));
            }

            let (a, b) = (a.reg, b.reg);
            return Ok(match op {
                And => self.op(Bool, |dst| VMOp::AndL(a, b, dst)),
                _ => self.op(Bool, |dst| VMOp::OrL(a, b, dst)),
            });
        }

        let (a, b) = self.unify(a, b)?;
        let ty = a.ty;
        let (a, b) = (a.reg, b.reg);

        let value = match (op, ty) {
            (Eq, Float) => self.op(Bool, |dst| VMOp::EqF(a, b, dst)),
            (Ne, Float) => self.op(Bool, |dst| VMOp::NeF(a, b, dst)),
            (Eq, _) => self.op(Bool, |dst| VMOp::EqI(a, b, dst)),
            (Ne, _) => self.op(Bool, |dst| VMOp::NeI(a, b, dst)),
            (_, Bool) | (And | Or, _) => {
                return Err(type_error(format!("operator {op:?} is not defined for {}", ty.name())));
            }

            (Lt, Float) => self.op(Bool, |dst| VMOp::LtF(a, b, dst)),
            (Ge, Float) => self.op(Bool, |dst| VMOp::GeF(a, b, dst)),
            (Gt, Float) => self.op(Bool, |dst| VMOp::LtF(b, a, dst)),
            (Le, Float) => self.op(Bool, |dst| VMOp::GeF(b, a, dst)),
            (Lt, Uint) => self.op(Bool, |dst| VMOp::LtU(a, b, dst)),
            (Ge, Uint) => self.op(Bool, |dst| VMOp::GeU(a, b, dst)),
            (Gt, Uint) => self.op(Bool, |dst| VMOp::LtU(b, a, dst)),
            (Le, Uint) => self.op(Bool, |dst| VMOp::GeU(b, a, dst)),
            (Lt, _) => self.op(Bool, |dst| VMOp::LtI(a, b, dst)),
            (Ge, _) => self.op(Bool, |dst| VMOp::GeI(a, b, dst)),
            (Gt, _) => self.op(Bool, |dst| VMOp::LtI(b, a, dst)),
            (Le, _) => self.op(Bool, |dst| VMOp::GeI(b, a, dst)),

            (Add, Float) => self.op(ty, |dst| VMOp::AddF(a, b, dst)),
            (Sub, Float) => self.op(ty, |dst| VMOp::SubF(a, b, dst)),
            (Mul, Float) => self.op(ty, |dst| VMOp::MulF(a, b, dst)),
            (Div, Float) => self.op(ty, |dst| VMOp::DivF(a, b, dst)),
            (Mod, Float) => self.op(ty, |dst| VMOp::ModF(a, b, dst)),
            (Add, _) => self.op(ty, |dst| VMOp::AddI(a, b, dst)),
            (Sub, _) => self.op(ty, |dst| VMOp::SubI(a, b, dst)),
            (Mul, _) => self.op(ty, |dst| VMOp::MulI(a, b, dst)),
            (Div, Uint) => self.op(ty, |dst| VMOp::DivU(a, b, dst)),
            (Mod, Uint) => self.op(ty, |dst| VMOp::ModU(a, b, dst)),
            (Div, Int) => self.op(ty, |dst| VMOp::DivI(a, b, dst)),
            (Mod, Int) => self.op(ty, |dst| VMOp::ModI(a, b, dst)),
        };

        Ok(value)
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, CompileError> {
        use ScalarType::*;

        let arity = match name {
            "min" | "max" => 2,
            "float" | "int" | "uint" | "bool" | "sin" | "cos" | "abs" | "sqrt" | "floor" | "ceil" | "frac" => 1,
            _ => return Err(CompileError::UnknownFunction(name.to_string())),
        };

        if args.len() != arity {
            return Err(type_error(format!(
                "`{name}` expects {arity} argument(s), got {}",
                args.len()
            )));
        }

        let a = args[0];
        Ok(match name {
            "float" => self.convert(a, Float),
            "int" => self.convert(a, Int),
            "uint" => self.convert(a, Uint),
            "bool" => self.convert(a, Bool),

            "abs" => match a.ty {
                Float => self.op(Float, |dst| VMOp::AbsF(a.reg, dst)),
                Int => {
                    let neg = self.op(Int, |dst| VMOp::NegI(a.reg, dst));
                    self.op(Int, |dst| VMOp::MaxI(a.reg, neg.reg, dst))
                }
                Uint => a,
                Bool => return Err(type_error("`abs` is not defined for bool")),
            },

            "min" | "max" => {
                let (a, b) = self.unify(a, args[1])?;
                let is_min = name == "min";
                match a.ty {
                    Float if is_min => self.op(Float, |dst| VMOp::MinF(a.reg, b.reg, dst)),
                    Float => self.op(Float, |dst| VMOp::MaxF(a.reg, b.reg, dst)),
                    Int if is_min => self.op(Int, |dst| VMOp::MinI(a.reg, b.reg, dst)),
                    Int => self.op(Int, |dst| VMOp::MaxI(a.reg, b.reg, dst)),
                    Uint => {
                        let lt = self.op(Bool, |dst| VMOp::LtU(a.reg, b.reg, dst));
                        let dst = self.builder.reg();
                        let (x, y) = if is_min { (a, b) } else { (b, a) };
                        self.builder.select(lt.reg, x.reg, y.reg, dst);
                        Value { reg: dst, ty: Uint }
                    }
                    Bool => return Err(type_error(format!("`{name}` is not defined for bool"))),
                }
            }

            _ => {
                if a.ty == Bool {
                    return Err(type_error(format!("`{name}` is not defined for bool")));
                }

                let a = self.convert(a, Float).reg;
                match name {
                    "sin" => self.op(Float, |dst| VMOp::SinF(a, dst)),
                    "cos" => self.op(Float, |dst| VMOp::CosF(a, dst)),
                    "sqrt" => self.op(Float, |dst| VMOp::SqrtF(a, dst)),
                    "floor" => self.op(Float, |dst| VMOp::FloorF(a, dst)),
                    "ceil" => self.op(Float, |dst| VMOp::CeilF(a, dst)),
                    _ => self.op(Float, |dst| VMOp::FracF(a, dst)),
                }
            }
        })
    }
}
