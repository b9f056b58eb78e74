use super::Word;
use crate::{Binding, BindingError, Bundle, Fault, SystemValues, UavPool, VmError};
use fxvm_core::{ExternReflection, LayoutError, Native, Program, REGISTER_COUNT, TypeLayout, VMOp, slot_name};
use tracing::{info, warn};

/// A single vm instance: one register file, reused by every invocation.
///
/// Registers are not cleared between invocations; programs must not read registers they
/// did not write.
pub struct Vm {
    registers: Box<[u32]>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            registers: vec![0; REGISTER_COUNT].into_boxed_slice(),
        }
    }

    pub fn registers(&self) -> &[u32] {
        &self.registers
    }

    pub fn clear(&mut self) {
        self.registers.fill(0);
    }

    /// Decode the value left in registers `0..` according to `layout`.
    pub fn result(&self, layout: &TypeLayout) -> Result<Native, LayoutError> {
        let words = (layout.words() as usize).min(self.registers.len());
        let bytes = self.registers[..words]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect::<Vec<u8>>();
        Native::decode(&bytes, layout)
    }

    /// Run the bundle's program once.
    ///
    /// Returns register 0 reinterpreted as `i32`, or 0 when the program returns nothing.
    /// Falling off the end of the code is the same as `Ret`.
    pub fn play(&mut self, bundle: &mut Bundle, uavs: &mut UavPool, system: &SystemValues) -> Result<i32, VmError> {
        use VMOp::*;

        let program = bundle.program.clone();
        let code = program.code();
        let registers = &mut self.registers[..];
        let mut pc = 0usize;

        macro_rules! op {
            (|$a:ident: $ta:ty| $x:expr => $dst:ident) => {{
                let $a = <$ta as Word>::from_word(read(registers, pc, $a)?);
                write(registers, pc, $dst, Word::into_word($x))?;
            }};

            (|$a:ident: $ta:ty, $b:ident: $tb:ty| $x:expr => $dst:ident) => {{
                let $a = <$ta as Word>::from_word(read(registers, pc, $a)?);
                let $b = <$tb as Word>::from_word(read(registers, pc, $b)?);
                write(registers, pc, $dst, Word::into_word($x))?;
            }};

            (|$a:ident: $ta:ty, $b:ident: $tb:ty, $c:ident: $tc:ty| $x:expr => $dst:ident) => {{
                let $a = <$ta as Word>::from_word(read(registers, pc, $a)?);
                let $b = <$tb as Word>::from_word(read(registers, pc, $b)?);
                let $c = <$tc as Word>::from_word(read(registers, pc, $c)?);
                write(registers, pc, $dst, Word::into_word($x))?;
            }};
        }

        while let Some(&op) = code.get(pc) {
            let mut next = pc + 1;

            match op {
                LitI(value, dst) => write(registers, pc, dst, value as u32)?,
                Mov(src, dst) => {
                    let value = read(registers, pc, src)?;
                    write(registers, pc, dst, value)?;
                }
                LoadInput(slot, offset, dst) => {
                    let value = load_input(bundle, uavs, system, pc, slot, offset)?;
                    write(registers, pc, dst, value)?;
                }
                StoreInput(slot, offset, src) => {
                    let value = read(registers, pc, src)?;
                    store_input(bundle, uavs, pc, slot, offset, value)?;
                }
                LoadPtr(ptr, offset, dst) => {
                    let addr = read(registers, pc, ptr)?.wrapping_add(offset);
                    let value = read(registers, pc, addr)?;
                    write(registers, pc, dst, value)?;
                }
                StorePtr(ptr, offset, src) => {
                    let addr = read(registers, pc, ptr)?.wrapping_add(offset);
                    let value = read(registers, pc, src)?;
                    write(registers, pc, addr, value)?;
                }
                LoadInputPtr(slot, ptr, offset, dst) => {
                    let offset = read(registers, pc, ptr)?.wrapping_add(offset);
                    let value = load_input(bundle, uavs, system, pc, slot, offset)?;
                    write(registers, pc, dst, value)?;
                }
                StoreInputPtr(slot, ptr, offset, src) => {
                    let offset = read(registers, pc, ptr)?.wrapping_add(offset);
                    let value = read(registers, pc, src)?;
                    store_input(bundle, uavs, pc, slot, offset, value)?;
                }
                Call(id, base) => call_extern(bundle, &program, registers, pc, id, base)?,

                AddI(a, b, dst) => op!(|a: i32, b: i32| a.wrapping_add(b) => dst),
                SubI(a, b, dst) => op!(|a: i32, b: i32| a.wrapping_sub(b) => dst),
                MulI(a, b, dst) => op!(|a: i32, b: i32| a.wrapping_mul(b) => dst),
                DivI(a, b, dst) => op!(|a: i32, b: i32| if b == 0 { 0 } else { a.wrapping_div(b) } => dst),
                ModI(a, b, dst) => op!(|a: i32, b: i32| if b == 0 { 0 } else { a.wrapping_rem(b) } => dst),
                MadI(a, b, c, dst) => op!(|a: i32, b: i32, c: i32| a.wrapping_add(b.wrapping_mul(c)) => dst),
                MinI(a, b, dst) => op!(|a: i32, b: i32| a.min(b) => dst),
                MaxI(a, b, dst) => op!(|a: i32, b: i32| a.max(b) => dst),
                DivU(a, b, dst) => op!(|a: u32, b: u32| a.checked_div(b).unwrap_or(0) => dst),
                ModU(a, b, dst) => op!(|a: u32, b: u32| a.checked_rem(b).unwrap_or(0) => dst),

                AddF(a, b, dst) => op!(|a: f32, b: f32| a + b => dst),
                SubF(a, b, dst) => op!(|a: f32, b: f32| a - b => dst),
                MulF(a, b, dst) => op!(|a: f32, b: f32| a * b => dst),
                DivF(a, b, dst) => op!(|a: f32, b: f32| a / b => dst),
                ModF(a, b, dst) => op!(|a: f32, b: f32| a % b => dst),
                MinF(a, b, dst) => op!(|a: f32, b: f32| a.min(b) => dst),
                MaxF(a, b, dst) => op!(|a: f32, b: f32| a.max(b) => dst),

                LtU(a, b, dst) => op!(|a: u32, b: u32| a < b => dst),
                GeU(a, b, dst) => op!(|a: u32, b: u32| a >= b => dst),
                LtI(a, b, dst) => op!(|a: i32, b: i32| a < b => dst),
                GeI(a, b, dst) => op!(|a: i32, b: i32| a >= b => dst),
                EqI(a, b, dst) => op!(|a: u32, b: u32| a == b => dst),
                NeI(a, b, dst) => op!(|a: u32, b: u32| a != b => dst),
                NotI(a, dst) => op!(|a: bool| !a => dst),
                LtF(a, b, dst) => op!(|a: f32, b: f32| a < b => dst),
                GeF(a, b, dst) => op!(|a: f32, b: f32| a >= b => dst),
                EqF(a, b, dst) => op!(|a: f32, b: f32| a == b => dst),
                NeF(a, b, dst) => op!(|a: f32, b: f32| a != b => dst),

                OrL(a, b, dst) => op!(|a: bool, b: bool| a || b => dst),
                AndL(a, b, dst) => op!(|a: bool, b: bool| a && b => dst),

                FracF(a, dst) => op!(|a: f32| a - a.floor() => dst),
                FloorF(a, dst) => op!(|a: f32| a.floor() => dst),
                CeilF(a, dst) => op!(|a: f32| a.ceil() => dst),
                SinF(a, dst) => op!(|a: f32| a.sin() => dst),
                CosF(a, dst) => op!(|a: f32| a.cos() => dst),
                AbsF(a, dst) => op!(|a: f32| a.abs() => dst),
                SqrtF(a, dst) => op!(|a: f32| a.sqrt() => dst),
                NegF(a, dst) => op!(|a: f32| -a => dst),
                NegI(a, dst) => op!(|a: i32| a.wrapping_neg() => dst),

                U32ToF32(a, dst) => op!(|a: u32| a as f32 => dst),
                I32ToF32(a, dst) => op!(|a: i32| a as f32 => dst),
                F32ToI32(a, dst) => op!(|a: f32| a as i32 => dst),
                F32ToU32(a, dst) => op!(|a: f32| a as u32 => dst),

                Jump(target) => {
                    if target as usize > code.len() {
                        return Err(Fault::JumpOutOfRange { pc, target }.into());
                    }
                    next = target as usize;
                }
                JumpIf(cond) => {
                    if read(registers, pc, cond)? != 0 {
                        next = pc + 2;
                    }
                }
                Ret => break,
            }

            pc = next;
        }

        if program.result().is_void() {
            Ok(0)
        } else {
            Ok(registers[0] as i32)
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn read(registers: &[u32], pc: usize, reg: u32) -> Result<u32, Fault> {
    registers
        .get(reg as usize)
        .copied()
        .ok_or(Fault::RegisterOutOfRange { pc, reg })
}

fn write(registers: &mut [u32], pc: usize, reg: u32, value: u32) -> Result<(), Fault> {
    *registers
        .get_mut(reg as usize)
        .ok_or(Fault::RegisterOutOfRange { pc, reg })? = value;
    Ok(())
}

fn unbound(slot: u32) -> BindingError {
    BindingError::Unbound {
        slot,
        register: slot_name(slot),
    }
}

fn stale(slot: u32) -> BindingError {
    BindingError::StaleUav {
        slot,
        register: slot_name(slot),
    }
}

fn out_of_range(pc: usize, slot: u32, offset: u32) -> VmError {
    VmError::from(Fault::InputOutOfRange {
        pc,
        register: slot_name(slot),
        offset,
    })
}

fn load_input(
    bundle: &Bundle,
    uavs: &UavPool,
    system: &SystemValues,
    pc: usize,
    slot: u32,
    offset: u32,
) -> Result<u32, VmError> {
    let value = match bundle.binding(slot).ok_or(BindingError::InvalidSlot(slot))? {
        Binding::Unbound => return Err(unbound(slot).into()),
        Binding::Constants => bundle.constants.read(offset),
        Binding::Memory(index) => bundle.memory[index].read(offset),
        Binding::Uav(key) => uavs.get(key).ok_or_else(|| stale(slot))?.memory().read(offset),
        Binding::System(value) => system.get(value).get(offset as usize).copied(),
    };

    value.ok_or_else(|| out_of_range(pc, slot, offset))
}

fn store_input(
    bundle: &mut Bundle,
    uavs: &mut UavPool,
    pc: usize,
    slot: u32,
    offset: u32,
    value: u32,
) -> Result<(), VmError> {
    let stored = match bundle.binding(slot).ok_or(BindingError::InvalidSlot(slot))? {
        Binding::Unbound => return Err(unbound(slot).into()),
        Binding::Constants | Binding::System(_) => {
            return Err(Fault::ReadOnlyInput {
                pc,
                register: slot_name(slot),
            }
            .into());
        }
        Binding::Memory(index) => bundle.memory[index].write(offset, value),
        Binding::Uav(key) => uavs
            .get_mut(key)
            .ok_or_else(|| stale(slot))?
            .memory_mut()
            .write(offset, value),
    };

    stored.ok_or_else(|| out_of_range(pc, slot, offset))
}

/// The result occupies `regs[base..]`, the arguments follow it.
fn call_extern(
    bundle: &mut Bundle,
    program: &Program,
    registers: &mut [u32],
    pc: usize,
    id: u32,
    base: u32,
) -> Result<(), Fault> {
    let ext = program
        .reflection()
        .externs
        .iter()
        .find(|e| e.id == id)
        .ok_or(Fault::UnknownExtern { pc, id })?;

    let ret = ext.ret.words() as usize;
    let params = ext.params.iter().map(|p| p.words() as usize).sum::<usize>();
    let start = base as usize;
    let end = start + ret + params;
    if end > registers.len() {
        return Err(Fault::RegisterOutOfRange {
            pc,
            reg: end.saturating_sub(1) as u32,
        });
    }

    let (result, args) = registers[start..end].split_at_mut(ret);
    match bundle.externs.get_mut(id as usize).and_then(Option::as_mut) {
        Some(f) => f(args, result),
        None if ext.name == "trace" => {
            info!(pc, values = ?decode_args(ext, args), "trace");
            result.fill(0);
        }
        None => {
            warn!(name = %ext.name, pc, "extern has no host function");
            result.fill(0);
        }
    }

    Ok(())
}

fn decode_args(ext: &ExternReflection, args: &[u32]) -> Vec<Native> {
    let bytes = args.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>();
    let mut offset = 0;
    ext.params
        .iter()
        .filter_map(|param| {
            let value = Native::decode(&bytes[offset..], param).ok();
            offset += param.words() as usize * 4;
            value
        })
        .collect()
}
