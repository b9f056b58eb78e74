use crate::{BindingError, ConstantError, Memory, UavError, UavKey};
use fxvm_core::{CBUFFER0_REGISTER, INPUT_SLOTS, Native, Program, SystemValue, UAV_TOTAL, UAV0_REGISTER, slot_name};
use std::{fmt, sync::Arc};

/// Host implementation of an extern: `(arguments, result)`, both as raw words.
pub type ExternFn = Box<dyn FnMut(&[u32], &mut [u32])>;

/// What an input slot of a [`Bundle`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    /// The bundle's own constant buffer.
    Constants,
    /// Input memory owned by the bundle, see [`Bundle::bind_memory`].
    Memory(usize),
    Uav(UavKey),
    /// The dispatcher's system value scratch.
    System(SystemValue),
}

/// A program together with the storage its inputs are bound to.
///
/// Bundles are created by [`Runtime::load`](crate::Runtime::load) and may be replayed and
/// rebound freely between invocations.
pub struct Bundle {
    pub(crate) program: Arc<Program>,
    pub(crate) inputs: [Binding; INPUT_SLOTS],
    pub(crate) constants: Memory,
    pub(crate) memory: Vec<Memory>,
    pub(crate) externs: Vec<Option<ExternFn>>,
}

impl Bundle {
    /// Bind `b0` to a copy of the program's initial constants, everything else stays unbound.
    pub fn new(program: Arc<Program>) -> Self {
        let mut inputs = [Binding::Unbound; INPUT_SLOTS];
        inputs[CBUFFER0_REGISTER as usize] = Binding::Constants;

        let externs = program
            .reflection()
            .externs
            .iter()
            .map(|e| e.id as usize + 1)
            .max()
            .unwrap_or(0);

        Self {
            constants: Memory::from_bytes(program.constants()),
            memory: Vec::new(),
            externs: std::iter::repeat_with(|| None).take(externs).collect(),
            inputs,
            program,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn binding(&self, slot: u32) -> Option<Binding> {
        self.inputs.get(slot as usize).copied()
    }

    pub fn unbind(&mut self, slot: u32) -> Result<(), BindingError> {
        *self.slot_mut(slot)? = Binding::Unbound;
        Ok(())
    }

    /// Bind a UAV at `u{register}`.
    pub fn bind_uav(&mut self, register: u32, uav: UavKey) -> Result<(), UavError> {
        if register >= UAV_TOTAL {
            return Err(UavError::InvalidRegister(register));
        }

        self.inputs[(UAV0_REGISTER + register) as usize] = Binding::Uav(uav);
        Ok(())
    }

    pub fn bind_system(&mut self, value: SystemValue) {
        self.inputs[value.slot() as usize] = Binding::System(value);
    }

    /// Bind a copy of `bytes` at `slot`, replacing memory previously bound there.
    pub fn bind_memory(&mut self, slot: u32, bytes: &[u8]) -> Result<(), BindingError> {
        let memory = Memory::from_bytes(bytes);
        let index = match self.binding(slot).ok_or(BindingError::InvalidSlot(slot))? {
            Binding::Memory(index) => {
                self.memory[index] = memory;
                return Ok(());
            }
            _ => self.memory.len(),
        };

        self.memory.push(memory);
        self.inputs[slot as usize] = Binding::Memory(index);
        Ok(())
    }

    /// Contents of the memory bound at `slot`, if any.
    pub fn memory(&self, slot: u32) -> Option<&[u8]> {
        match self.binding(slot)? {
            Binding::Memory(index) => Some(self.memory[index].bytes()),
            _ => None,
        }
    }

    pub fn constants(&self) -> &[u8] {
        self.constants.bytes()
    }

    /// Write a named constant at its reflected offset.
    pub fn set_constant(&mut self, name: &str, value: impl Into<Native>) -> Result<(), ConstantError> {
        let value = value.into();
        let constant = self
            .program
            .constant(name)
            .ok_or_else(|| ConstantError::Unknown(name.to_string()))?;

        let bytes = self
            .constants
            .bytes_mut()
            .get_mut(constant.offset as usize..)
            .ok_or_else(|| ConstantError::OutOfRange {
                name: name.to_string(),
                offset: constant.offset,
            })?;

        value
            .encode(&constant.ty, bytes)
            .map_err(|source| ConstantError::TypeMismatch {
                name: name.to_string(),
                source,
            })
    }

    /// Apply every uniform the program declares; names it does not declare are skipped.
    ///
    /// Returns the number of constants written.
    pub fn set_uniforms<'a>(
        &mut self,
        uniforms: impl IntoIterator<Item = (&'a str, Native)>,
    ) -> Result<usize, ConstantError> {
        let mut written = 0;
        for (name, value) in uniforms {
            if self.program.constant(name).is_some() {
                self.set_constant(name, value)?;
                written += 1;
            }
        }

        Ok(written)
    }

    /// Install the host function for a declared extern. Returns `false` if the program
    /// declares no extern with that name.
    pub fn set_extern(&mut self, name: &str, f: impl FnMut(&[u32], &mut [u32]) + 'static) -> bool {
        match self
            .program
            .extern_fn(name)
            .and_then(|ext| self.externs.get_mut(ext.id as usize))
        {
            Some(slot) => {
                *slot = Some(Box::new(f));
                true
            }
            None => false,
        }
    }

    fn slot_mut(&mut self, slot: u32) -> Result<&mut Binding, BindingError> {
        self.inputs
            .get_mut(slot as usize)
            .ok_or(BindingError::InvalidSlot(slot))
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, binding)| **binding != Binding::Unbound)
            .map(|(slot, binding)| (slot_name(slot as u32), binding))
            .collect::<Vec<_>>();

        f.debug_struct("Bundle")
            .field("code", &self.program.code().len())
            .field("inputs", &bound)
            .field("constants", &self.constants)
            .field(
                "externs",
                &self.externs.iter().filter(|e| e.is_some()).count(),
            )
            .finish()
    }
}
