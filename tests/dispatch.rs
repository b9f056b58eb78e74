use fxvm::{Program, ProgramBuilder, Runtime, ScalarType, Slot, SystemValue, TypeLayout, VMOp};
use std::{collections::BTreeMap, error::Error, sync::Arc};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// Append `values` to the `log` uav, using its counter as the write cursor.
fn recorder(values: &[(SystemValue, u32)]) -> Program {
    let mut builder = ProgramBuilder::new(TypeLayout::void());
    let words = values.len() as u32;
    let log: Slot = builder.uav("log", 0, TypeLayout::array(TypeLayout::scalar(ScalarType::Int), words));

    let n = builder.load(log, 0);
    let one = builder.lit_i(1);
    let stride = builder.lit_i(words as i32);
    let next = builder.reg();
    let base = builder.reg();
    builder
        .push(VMOp::AddI(n, one, next))
        .push(VMOp::StoreInput(log, 0, next))
        .push(VMOp::MadI(one, n, stride, base));

    for (word, &(value, component)) in values.iter().enumerate() {
        let value = builder.system_value(value, component);
        builder.push(VMOp::StoreInputPtr(log, base, word as u32, value));
    }

    builder.finish().expect("recorder assembles")
}

fn run<const N: usize>(
    program: Program,
    groups: [u32; 3],
    threads: [u32; 3],
) -> Result<(u64, Vec<[i32; N]>), Box<dyn Error>> {
    init_logging();

    let invocations = groups.iter().chain(threads.iter()).product::<u32>();
    let mut runtime = Runtime::new();
    let log = runtime.create_uav("log", 4 * N as u32, invocations, 0)?;
    let mut bundle = runtime.load(Arc::new(program));
    bundle.bind_uav(0, log)?;

    let played = runtime.dispatch(&mut bundle, groups, threads)?;
    let uav = runtime.uav(log).ok_or("log uav is gone")?;
    let rows = (0..uav.read_counter() as u32)
        .filter_map(|i| uav.read_element::<[i32; N]>(i))
        .collect();
    Ok((played, rows))
}

/// two groups of two threads along x
/// tests:
/// - the dispatch thread id is `group * numthreads + thread`
/// - invocations run in x order
#[test]
fn dispatch_thread_ids() -> Result<(), Box<dyn Error>> {
    let program = recorder(&[
        (SystemValue::DispatchThreadId, 0),
        (SystemValue::DispatchThreadId, 1),
        (SystemValue::DispatchThreadId, 2),
    ]);

    let (played, rows) = run::<3>(program, [2, 1, 1], [2, 1, 1])?;
    assert_eq!(played, 4);
    assert_eq!(rows, vec![[0, 0, 0], [1, 0, 0], [2, 0, 0], [3, 0, 0]]);
    Ok(())
}

/// a 2x2x1 grid of 2x3x2 groups
/// tests:
/// - every group runs exactly `numthreads` invocations
/// - group index enumerates `0..tx*ty*tz` once per group, z major
/// - the innermost loop walks threads along x
#[test]
fn group_index_covers_each_group() -> Result<(), Box<dyn Error>> {
    let program = recorder(&[
        (SystemValue::GroupId, 0),
        (SystemValue::GroupId, 1),
        (SystemValue::GroupIndex, 0),
        (SystemValue::GroupThreadId, 0),
        (SystemValue::GroupThreadId, 1),
        (SystemValue::GroupThreadId, 2),
    ]);

    let (played, rows) = run::<6>(program, [2, 2, 1], [2, 3, 2])?;
    assert_eq!(played, 48);
    assert_eq!(rows.len(), 48);

    let mut groups = BTreeMap::<(i32, i32), Vec<i32>>::new();
    for [gx, gy, index, tx, ty, tz] in rows.iter().copied() {
        assert_eq!(index, tz * 6 + ty * 2 + tx);
        groups.entry((gx, gy)).or_default().push(index);
    }

    assert_eq!(groups.len(), 4);
    for indices in groups.values() {
        assert_eq!(indices, &(0..12).collect::<Vec<_>>());
    }

    assert_eq!(rows[1][3..], [1, 0, 0]);
    assert_eq!(rows[2][3..], [0, 1, 0]);
    Ok(())
}

/// an encoded program runs like the one it was encoded from
#[test]
fn decoded_programs_dispatch() -> Result<(), Box<dyn Error>> {
    let program = recorder(&[(SystemValue::DispatchThreadId, 0)]);
    let decoded = Program::decode(&program.encode())?;

    let (_, rows) = run::<1>(decoded, [3, 1, 1], [4, 1, 1])?;
    assert_eq!(rows, (0..12).map(|i| [i]).collect::<Vec<_>>());
    Ok(())
}

/// an empty grid plays nothing
#[test]
fn empty_dispatch() -> Result<(), Box<dyn Error>> {
    let program = recorder(&[(SystemValue::GroupIndex, 0)]);
    let mut runtime = Runtime::new();
    let log = runtime.create_uav("log", 4, 1, 0)?;
    let mut bundle = runtime.load(Arc::new(program));
    bundle.bind_uav(0, log)?;

    assert_eq!(runtime.dispatch(&mut bundle, [0u32, 4, 4], [8u32, 1, 1])?, 0);
    assert_eq!(runtime.uav(log).map(|uav| uav.read_counter()), Some(0));
    Ok(())
}
