use crate::{Bundle, Dispatcher, SystemValues, UavError, UavKey, UavPool, UavResource, Vm, VmError};
use fxvm_core::{Dim3, LayoutError, Native, Program};
use std::sync::Arc;

/// A vm, the UAVs it can address and a dispatcher, owned together.
///
/// Runtimes share nothing; several can coexist in one process.
#[derive(Default)]
pub struct Runtime {
    vm: Vm,
    uavs: UavPool,
    dispatcher: Dispatcher,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bundle for `program` with only its constant buffer bound.
    pub fn load(&self, program: Arc<Program>) -> Bundle {
        Bundle::new(program)
    }

    /// Run `bundle` once, see [`Vm::play`].
    pub fn play(&mut self, bundle: &mut Bundle) -> Result<i32, VmError> {
        self.dispatcher.play(&mut self.vm, bundle, &mut self.uavs)
    }

    pub fn dispatch(
        &mut self,
        bundle: &mut Bundle,
        groups: impl Into<Dim3>,
        threads: impl Into<Dim3>,
    ) -> Result<u64, VmError> {
        self.dispatcher
            .dispatch(&mut self.vm, bundle, &mut self.uavs, groups.into(), threads.into())
    }

    /// Dispatch with the thread group size the program declares.
    pub fn dispatch_groups(&mut self, bundle: &mut Bundle, groups: impl Into<Dim3>) -> Result<u64, VmError> {
        let threads = bundle.program().numthreads();
        self.dispatch(bundle, groups, threads)
    }

    /// Value of the last invocation, decoded with the bundle's result layout.
    pub fn result(&self, bundle: &Bundle) -> Result<Native, LayoutError> {
        self.vm.result(bundle.program().result())
    }

    pub fn create_uav(&mut self, name: &str, element_size: u32, length: u32, register: u32) -> Result<UavKey, UavError> {
        self.uavs.create(name, element_size, length, register)
    }

    pub fn uav(&self, key: UavKey) -> Option<&UavResource> {
        self.uavs.get(key)
    }

    pub fn uav_mut(&mut self, key: UavKey) -> Option<&mut UavResource> {
        self.uavs.get_mut(key)
    }

    pub fn find_uav(&self, name: &str) -> Option<UavKey> {
        self.uavs.find(name)
    }

    pub fn uavs(&self) -> &UavPool {
        &self.uavs
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn system_values(&self) -> &SystemValues {
        self.dispatcher.system_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxvm_core::{ProgramBuilder, ScalarType, SystemValue, TypeLayout, VMOp};

    /// Appends `DispatchThreadID.x` at the next free element of `u0`.
    fn recorder() -> Arc<Program> {
        let mut builder = ProgramBuilder::new(TypeLayout::void());
        let out = builder.uav("out", 0, TypeLayout::scalar(ScalarType::Uint));
        let n = builder.load(out, 0);
        let one = builder.lit_i(1);
        let next = builder.reg();
        let tid = builder.system_value(SystemValue::DispatchThreadId, 0);
        builder
            .push(VMOp::AddI(n, one, next))
            .push(VMOp::StoreInput(out, 0, next))
            .push(VMOp::StoreInputPtr(out, n, 1, tid));
        Arc::new(builder.finish().unwrap())
    }

    #[test]
    fn dispatch_order_is_observable() {
        let mut runtime = Runtime::new();
        let mut bundle = runtime.load(recorder());
        let out = runtime.create_uav("out", 4, 8, 0).unwrap();
        bundle.bind_uav(0, out).unwrap();

        assert_eq!(runtime.dispatch(&mut bundle, [2u32, 1, 1], [2u32, 1, 1]), Ok(4));
        let uav = runtime.uav(out).unwrap();
        assert_eq!(uav.read_counter(), 4);
        assert_eq!(
            (0..4).map(|i| uav.read_element::<u32>(i)).collect::<Vec<_>>(),
            [Some(0), Some(1), Some(2), Some(3)]
        );
        assert_eq!(runtime.system_values().dispatch_thread_id, [3, 0, 0]);
    }

    #[test]
    fn failing_invocation_aborts() {
        let mut runtime = Runtime::new();
        let mut bundle = runtime.load(recorder());
        let out = runtime.create_uav("out", 4, 2, 0).unwrap();
        bundle.bind_uav(0, out).unwrap();

        // the third invocation writes past the end of the buffer
        assert!(matches!(
            runtime.dispatch(&mut bundle, 4u32, 1u32),
            Err(VmError::Fault(crate::Fault::InputOutOfRange { .. }))
        ));
        assert_eq!(runtime.uav(out).map(|u| u.read_counter()), Some(3));
    }

    #[test]
    fn numthreads_from_program() {
        let mut builder = ProgramBuilder::new(TypeLayout::void());
        builder.numthreads([4u32, 2, 1]);
        let mut runtime = Runtime::new();
        let mut bundle = runtime.load(Arc::new(builder.finish().unwrap()));
        assert_eq!(runtime.dispatch_groups(&mut bundle, [3u32, 1, 1]), Ok(24));
    }
}
