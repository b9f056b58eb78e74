use crate::{Bundle, UavPool, Vm, VmError};
use fxvm_core::{Dim3, SystemValue};
use std::slice;
use tracing::trace;

/// System value scratch of a single invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemValues {
    pub group_id: [u32; 3],
    pub group_index: u32,
    pub group_thread_id: [u32; 3],
    pub dispatch_thread_id: [u32; 3],
}

impl SystemValues {
    pub fn get(&self, value: SystemValue) -> &[u32] {
        match value {
            SystemValue::GroupId => &self.group_id,
            SystemValue::GroupIndex => slice::from_ref(&self.group_index),
            SystemValue::GroupThreadId => &self.group_thread_id,
            SystemValue::DispatchThreadId => &self.dispatch_thread_id,
        }
    }
}

/// Every invocation of a dispatch in execution order.
///
/// Groups are visited z, y, x with x changing fastest, and so are the threads inside each group.
pub fn grid(groups: Dim3, threads: Dim3) -> impl Iterator<Item = SystemValues> {
    cells(groups).flat_map(move |g| {
        cells(threads).map(move |t| SystemValues {
            group_id: g,
            group_index: t[2]
                .wrapping_mul(threads.x)
                .wrapping_mul(threads.y)
                .wrapping_add(t[1].wrapping_mul(threads.x))
                .wrapping_add(t[0]),
            group_thread_id: t,
            dispatch_thread_id: [
                g[0].wrapping_mul(threads.x).wrapping_add(t[0]),
                g[1].wrapping_mul(threads.y).wrapping_add(t[1]),
                g[2].wrapping_mul(threads.z).wrapping_add(t[2]),
            ],
        })
    })
}

fn cells(dim: Dim3) -> impl Iterator<Item = [u32; 3]> {
    (0..dim.z).flat_map(move |z| (0..dim.y).flat_map(move |y| (0..dim.x).map(move |x| [x, y, z])))
}

/// Number of groups needed to cover `count` invocations along x.
pub fn groups_for(count: u32, numthreads: Dim3) -> Dim3 {
    Dim3::new(count.div_ceil(numthreads.x.max(1)), 1, 1)
}

/// Drives a bundle over a compute grid.
///
/// Every dispatcher owns its own system value scratch, which is bound to the bundle once per
/// dispatch; only its contents change between invocations.
#[derive(Debug, Default)]
pub struct Dispatcher {
    system: SystemValues,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_values(&self) -> &SystemValues {
        &self.system
    }

    pub fn play(&mut self, vm: &mut Vm, bundle: &mut Bundle, uavs: &mut UavPool) -> Result<i32, VmError> {
        vm.play(bundle, uavs, &self.system)
    }

    /// Play `bundle` once per grid cell. Returns the number of invocations.
    ///
    /// The first failing invocation aborts the dispatch.
    pub fn dispatch(
        &mut self,
        vm: &mut Vm,
        bundle: &mut Bundle,
        uavs: &mut UavPool,
        groups: Dim3,
        threads: Dim3,
    ) -> Result<u64, VmError> {
        for value in SystemValue::ALL {
            bundle.bind_system(value);
        }

        trace!(?groups, ?threads, invocations = groups.volume() * threads.volume(), "dispatch");

        let mut invocations = 0;
        for values in grid(groups, threads) {
            self.system = values;
            vm.play(bundle, uavs, &self.system)?;
            invocations += 1;
        }

        Ok(invocations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn dispatch_thread_ids() {
        let ids = grid(Dim3::new(2, 1, 1), Dim3::new(2, 1, 1))
            .map(|v| v.dispatch_thread_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, [[0, 0, 0], [1, 0, 0], [2, 0, 0], [3, 0, 0]]);
    }

    #[test]
    fn x_is_fastest() {
        let threads = grid(Dim3::ONE, Dim3::new(2, 2, 2))
            .map(|v| (v.group_thread_id, v.group_index))
            .collect::<Vec<_>>();
        assert_eq!(
            threads,
            [
                ([0, 0, 0], 0),
                ([1, 0, 0], 1),
                ([0, 1, 0], 2),
                ([1, 1, 0], 3),
                ([0, 0, 1], 4),
                ([1, 0, 1], 5),
                ([0, 1, 1], 6),
                ([1, 1, 1], 7),
            ]
        );
    }

    #[test]
    fn empty_grids() {
        assert_eq!(grid(Dim3::new(0, 4, 4), Dim3::ONE).count(), 0);
        assert_eq!(grid(Dim3::ONE, Dim3::new(3, 0, 1)).count(), 0);
    }

    #[test]
    fn system_value_slices() {
        let values = SystemValues {
            group_index: 5,
            dispatch_thread_id: [1, 2, 3],
            ..SystemValues::default()
        };
        assert_eq!(values.get(SystemValue::GroupIndex), &[5]);
        assert_eq!(values.get(SystemValue::DispatchThreadId), &[1, 2, 3]);
    }

    #[test]
    fn group_rounding() {
        assert_eq!(groups_for(100, Dim3::new(64, 1, 1)), Dim3::new(2, 1, 1));
        assert_eq!(groups_for(64, Dim3::new(64, 1, 1)), Dim3::new(1, 1, 1));
        assert_eq!(groups_for(0, Dim3::new(64, 1, 1)), Dim3::new(0, 1, 1));
        assert_eq!(groups_for(3, Dim3::new(0, 1, 1)), Dim3::new(3, 1, 1));
    }

    proptest! {
        #[test]
        fn grid_covers_every_cell(
            gx in 1u32..4, gy in 1u32..4, gz in 1u32..3,
            tx in 1u32..5, ty in 1u32..4, tz in 1u32..3,
        ) {
            let groups = Dim3::new(gx, gy, gz);
            let threads = Dim3::new(tx, ty, tz);
            let values = grid(groups, threads).collect::<Vec<_>>();
            prop_assert_eq!(values.len() as u64, groups.volume() * threads.volume());

            let per_group = threads.volume() as usize;
            for chunk in values.chunks(per_group) {
                let indices = chunk.iter().map(|v| v.group_index).collect::<HashSet<_>>();
                prop_assert_eq!(indices, (0..per_group as u32).collect::<HashSet<_>>());
                prop_assert!(chunk.iter().all(|v| v.group_id == chunk[0].group_id));
            }

            let ids = values.iter().map(|v| v.dispatch_thread_id).collect::<HashSet<_>>();
            prop_assert_eq!(ids.len(), values.len());
        }
    }
}
