use crate::bytecode::{Reg, Slot, VMOp};
use crate::layout::{Native, ScalarType, TypeLayout};
use crate::program::{ConstantReflection, ExternReflection, Program, Reflection, UavReflection};
use crate::{CBUFFER0_REGISTER, CompileError, Dim3, LayoutError, REGISTER_COUNT, SystemValue, UAV0_REGISTER};

/// A forward or backward jump target inside a [`ProgramBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

/// Assembles a [`Program`] instruction by instruction.
///
/// Registers are handed out linearly and never reused. The result value of the program
/// occupies registers `0..` and is reserved when the builder is created.
pub struct ProgramBuilder {
    code: Vec<VMOp>,
    constants: Vec<u8>,
    reflection: Reflection,
    next_reg: u32,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

impl ProgramBuilder {
    pub fn new(result: TypeLayout) -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            next_reg: result.words(),
            reflection: Reflection {
                result,
                ..Reflection::default()
            },
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// First register of the result value.
    pub fn result(&self) -> Reg {
        0
    }

    /// Change the result type; it must fit the registers reserved by [`ProgramBuilder::new`].
    pub fn set_result(&mut self, result: TypeLayout) -> Result<(), CompileError> {
        if result.words() > self.reflection.result.words() {
            return Err(CompileError::Type(format!(
                "result `{}` does not fit the reserved `{}`",
                result.name, self.reflection.result.name
            )));
        }

        self.reflection.result = result;
        Ok(())
    }

    pub fn reg(&mut self) -> Reg {
        self.regs(1)
    }

    /// Allocate `n` consecutive registers, returns the first one.
    pub fn regs(&mut self, n: u32) -> Reg {
        let reg = self.next_reg;
        self.next_reg += n;
        reg
    }

    /// Index of the next instruction.
    pub fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn push(&mut self, op: VMOp) -> &mut Self {
        self.code.push(op);
        self
    }

    pub fn lit_i(&mut self, value: i32) -> Reg {
        let reg = self.reg();
        self.push(VMOp::LitI(value, reg));
        reg
    }

    pub fn lit_u(&mut self, value: u32) -> Reg {
        self.lit_i(value as i32)
    }

    pub fn lit_f(&mut self, value: f32) -> Reg {
        self.lit_i(value.to_bits() as i32)
    }

    pub fn load(&mut self, slot: Slot, offset: u32) -> Reg {
        let reg = self.reg();
        self.push(VMOp::LoadInput(slot, offset, reg));
        reg
    }

    /// Load component `component` of a system value.
    pub fn system_value(&mut self, value: SystemValue, component: u32) -> Reg {
        self.load(value.slot(), component)
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.pc());
    }

    pub fn jump(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.push(VMOp::Jump(0));
    }

    /// Jump to `label` when `cond` is zero.
    pub fn jump_unless(&mut self, cond: Reg, label: Label) {
        self.push(VMOp::JumpIf(cond));
        self.jump(label);
    }

    /// Jump to `label` when `cond` is non zero.
    pub fn jump_if(&mut self, cond: Reg, label: Label) {
        let not = self.reg();
        self.push(VMOp::NotI(cond, not));
        self.jump_unless(not, label);
    }

    /// `dst = cond ? a : b`
    pub fn select(&mut self, cond: Reg, a: Reg, b: Reg, dst: Reg) {
        let otherwise = self.label();
        let end = self.label();
        self.jump_unless(cond, otherwise);
        self.push(VMOp::Mov(a, dst));
        self.jump(end);
        self.bind(otherwise);
        self.push(VMOp::Mov(b, dst));
        self.bind(end);
    }

    /// Declare a named constant in `b0`, initialised with `value`. Returns its word offset.
    pub fn constant(&mut self, name: impl Into<String>, ty: TypeLayout, value: &Native) -> Result<u32, LayoutError> {
        let mut bytes = vec![0; ty.words() as usize * 4];
        value.encode(&ty, &mut bytes)?;

        let offset = self.constants.len() as u32;
        self.constants.extend_from_slice(&bytes);

        self.reflection.constants.push(ConstantReflection {
            name: name.into(),
            semantic: String::new(),
            offset,
            size: ty.size,
            ty,
        });

        Ok(offset / 4)
    }

    /// Declare a zero initialised scalar constant and load it into a fresh register.
    pub fn uniform(&mut self, name: impl Into<String>, ty: TypeLayout) -> Result<Reg, LayoutError> {
        let value = match ty.kind.scalar() {
            Some(ScalarType::Bool) => Native::Bool(false),
            Some(ScalarType::Float) => Native::Float(0.0),
            _ => Native::Int(0),
        };
        let offset = self.constant(name, ty, &value)?;
        Ok(self.load(CBUFFER0_REGISTER, offset))
    }

    /// Declare a UAV at `u{register}`. Returns the input slot the program addresses it by.
    pub fn uav(&mut self, name: impl Into<String>, register: u32, ty: TypeLayout) -> Slot {
        self.reflection.uavs.push(UavReflection {
            name: name.into(),
            register,
            stride: ty.size,
            ty,
        });
        UAV0_REGISTER + register
    }

    /// Declare a host function. Returns the id used by [`VMOp::Call`].
    pub fn extern_fn(&mut self, name: impl Into<String>, ret: TypeLayout, params: Vec<TypeLayout>) -> u32 {
        let id = self.reflection.externs.len() as u32;
        self.reflection.externs.push(ExternReflection {
            id,
            name: name.into(),
            ret,
            params,
        });
        id
    }

    pub fn numthreads(&mut self, numthreads: impl Into<Dim3>) -> &mut Self {
        self.reflection.numthreads = numthreads.into();
        self
    }

    /// Resolve jumps and produce the program.
    ///
    /// Labels that were never bound resolve to the end of the code, which returns.
    pub fn finish(mut self) -> Result<Program, CompileError> {
        if self.next_reg as usize > REGISTER_COUNT {
            return Err(CompileError::TooManyRegisters);
        }

        let end = self.pc();
        for (pc, label) in self.fixups.drain(..) {
            self.code[pc] = VMOp::Jump(self.labels[label.0].unwrap_or(end));
        }

        Ok(Program::new(self.code, self.constants, self.reflection))
    }
}
